pub mod job_repo;
pub mod section_repo;

pub use job_repo::JobRepo;
pub use section_repo::SectionRepo;
