//! Static catalog of manuscript sections and output formats.

use serde::{Deserialize, Serialize};

/// A manuscript section the generator knows how to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub category: SectionCategory,
    /// Rough output size used for cost estimates and provider token caps.
    pub estimated_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionCategory {
    Core,
    Engineering,
    Business,
    Appendix,
}

/// All known sections, in default generation order.
pub const SECTIONS: &[SectionInfo] = &[
    SectionInfo {
        id: "executiveSummary",
        name: "Executive Summary",
        category: SectionCategory::Core,
        estimated_tokens: 2_000,
    },
    SectionInfo {
        id: "fundamentals",
        name: "Fundamental Physics",
        category: SectionCategory::Core,
        estimated_tokens: 25_000,
    },
    SectionInfo {
        id: "q3Effect",
        name: "Q3 Effect Discovery",
        category: SectionCategory::Core,
        estimated_tokens: 12_000,
    },
    SectionInfo {
        id: "validation",
        name: "Validation & Proof",
        category: SectionCategory::Core,
        estimated_tokens: 15_000,
    },
    SectionInfo {
        id: "engineering",
        name: "Device Engineering",
        category: SectionCategory::Engineering,
        estimated_tokens: 18_000,
    },
    SectionInfo {
        id: "applications",
        name: "Applications",
        category: SectionCategory::Business,
        estimated_tokens: 16_000,
    },
    SectionInfo {
        id: "economics",
        name: "Economics & Strategy",
        category: SectionCategory::Business,
        estimated_tokens: 14_000,
    },
    SectionInfo {
        id: "ecosystem",
        name: "SA Quantum Ecosystem",
        category: SectionCategory::Business,
        estimated_tokens: 10_000,
    },
    SectionInfo {
        id: "specifications",
        name: "Technical Specs",
        category: SectionCategory::Engineering,
        estimated_tokens: 17_000,
    },
    SectionInfo {
        id: "appendices",
        name: "Appendices & References",
        category: SectionCategory::Appendix,
        estimated_tokens: 20_000,
    },
];

/// Look up a catalog section by id.
pub fn find_section(id: &str) -> Option<&'static SectionInfo> {
    SECTIONS.iter().find(|s| s.id == id)
}

/// Section ids in default generation order.
pub fn default_order() -> Vec<String> {
    SECTIONS.iter().map(|s| s.id.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Output formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Comprehensive,
    Nature,
    Patent,
    Investor,
    Academic,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comprehensive => "comprehensive",
            Self::Nature => "nature",
            Self::Patent => "patent",
            Self::Investor => "investor",
            Self::Academic => "academic",
        }
    }

    /// Sections selected when a job does not specify its own selection.
    pub fn essential_sections(self) -> &'static [&'static str] {
        match self {
            Self::Comprehensive => &["executiveSummary", "fundamentals", "q3Effect", "validation"],
            Self::Nature => &["executiveSummary", "q3Effect", "validation"],
            Self::Patent => &["fundamentals", "q3Effect", "engineering"],
            Self::Investor => &["executiveSummary", "applications", "economics"],
            Self::Academic => &[
                "executiveSummary",
                "fundamentals",
                "q3Effect",
                "validation",
                "appendices",
            ],
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
