//! Semantic facets of a catalog entry.
//!
//! Every facet is embedded and indexed on its own. Facets are never compared
//! with each other, so distances from different facets are not comparable.


use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::StyleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Content,
    Style,
    Features,
    Color,
    AllAiInfo,
}

impl Facet {
    pub const ALL: [Self; 5] = [
        Self::Content,
        Self::Style,
        Self::Features,
        Self::Color,
        Self::AllAiInfo,
    ];

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Style => "style",
            Self::Features => "features",
            Self::Color => "color",
            Self::AllAiInfo => "all_ai_info",
        }
    }

    /// Stable slot of this facet in per-facet arrays.
    #[inline]
    pub const fn slot(self) -> usize {
        match self {
            Self::Content => 0,
            Self::Style => 1,
            Self::Features => 2,
            Self::Color => 3,
            Self::AllAiInfo => 4,
        }
    }

    /// File name of the persisted index for this facet
    #[inline]
    pub fn index_file_name(self) -> String {
        format!("index4{}.idx", self.as_str())
    }
}

impl fmt::Display for Facet {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Facet {
    type Err = StyleError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|facet| facet.as_str() == s)
            .ok_or_else(|| StyleError::InvalidFacet(s.to_string()))
    }
}
