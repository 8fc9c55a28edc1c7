//! App categorization by identifier.
//!
//! App identifiers are opaque package names. Categories are assigned from a
//! small keyword table, with explicit per-app overrides taking precedence.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse app category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppCategory {
    Social,
    Game,
    Entertainment,
    Communication,
    Productivity,
    Other,
}

impl AppCategory {
    /// All categories, in embedding slot order.
    pub const ALL: [AppCategory; 6] = [
        AppCategory::Social,
        AppCategory::Game,
        AppCategory::Entertainment,
        AppCategory::Communication,
        AppCategory::Productivity,
        AppCategory::Other,
    ];

    /// Multiplier applied by the heuristic scorer.
    pub fn weight(self) -> f64 {
        match self {
            AppCategory::Social => 1.4,
            AppCategory::Game => 1.5,
            AppCategory::Entertainment => 1.3,
            AppCategory::Communication => 1.0,
            AppCategory::Productivity => 0.7,
            AppCategory::Other => 1.0,
        }
    }

    /// Social, game and entertainment apps.
    pub fn is_high_engagement(self) -> bool {
        matches!(
            self,
            AppCategory::Social | AppCategory::Game | AppCategory::Entertainment
        )
    }

    pub fn index(self) -> usize {
        match self {
            AppCategory::Social => 0,
            AppCategory::Game => 1,
            AppCategory::Entertainment => 2,
            AppCategory::Communication => 3,
            AppCategory::Productivity => 4,
            AppCategory::Other => 5,
        }
    }
}

const DEFAULT_RULES: &[(&str, AppCategory)] = &[
    ("facebook", AppCategory::Social),
    ("instagram", AppCategory::Social),
    ("twitter", AppCategory::Social),
    ("tiktok", AppCategory::Social),
    ("musically", AppCategory::Social),
    ("snapchat", AppCategory::Social),
    ("reddit", AppCategory::Social),
    ("pinterest", AppCategory::Social),
    ("threads", AppCategory::Social),
    ("social", AppCategory::Social),
    ("game", AppCategory::Game),
    ("supercell", AppCategory::Game),
    ("roblox", AppCategory::Game),
    ("mojang", AppCategory::Game),
    ("king.", AppCategory::Game),
    ("youtube", AppCategory::Entertainment),
    ("netflix", AppCategory::Entertainment),
    ("twitch", AppCategory::Entertainment),
    ("spotify", AppCategory::Entertainment),
    ("disney", AppCategory::Entertainment),
    ("video", AppCategory::Entertainment),
    ("music", AppCategory::Entertainment),
    ("whatsapp", AppCategory::Communication),
    ("telegram", AppCategory::Communication),
    ("messag", AppCategory::Communication),
    ("mail", AppCategory::Communication),
    ("sms", AppCategory::Communication),
    ("dialer", AppCategory::Communication),
    ("docs", AppCategory::Productivity),
    ("sheets", AppCategory::Productivity),
    ("calendar", AppCategory::Productivity),
    ("notes", AppCategory::Productivity),
    ("office", AppCategory::Productivity),
    ("drive", AppCategory::Productivity),
];

/// Maps app identifiers to categories.
#[derive(Debug, Clone)]
pub struct AppCatalog {
    keywords: Vec<(String, AppCategory)>,
    overrides: HashMap<String, AppCategory>,
}

impl AppCatalog {
    /// A catalog with no rules; every app is `Other`.
    pub fn empty() -> Self {
        Self {
            keywords: Vec::new(),
            overrides: HashMap::new(),
        }
    }

    /// A catalog with the built-in keyword table.
    pub fn with_default_rules() -> Self {
        let mut catalog = Self::empty();
        for (keyword, category) in DEFAULT_RULES {
            catalog.add_keyword(keyword, *category);
        }
        catalog
    }

    /// Add a keyword rule. Earlier rules win.
    pub fn add_keyword(&mut self, keyword: &str, category: AppCategory) {
        self.keywords.push((keyword.to_lowercase(), category));
    }

    /// Pin a specific app to a category.
    pub fn insert(&mut self, app_id: impl Into<String>, category: AppCategory) {
        self.overrides.insert(app_id.into(), category);
    }

    pub fn classify(&self, app_id: &str) -> AppCategory {
        if let Some(category) = self.overrides.get(app_id) {
            return *category;
        }
        let lowered = app_id.to_lowercase();
        self.keywords
            .iter()
            .find(|(keyword, _)| lowered.contains(keyword.as_str()))
            .map(|(_, category)| *category)
            .unwrap_or(AppCategory::Other)
    }

    /// Mean category weight over the given apps; 1.0 when there are none.
    pub fn category_weight<'a, I>(&self, app_ids: I) -> f64
    where
        I: IntoIterator<Item = &'a str>,
    {
        let (sum, count) = app_ids
            .into_iter()
            .fold((0.0, 0usize), |(sum, count), app| {
                (sum + self.classify(app).weight(), count + 1)
            });
        if count == 0 {
            1.0
        } else {
            sum / count as f64
        }
    }
}

impl Default for AppCatalog {
    fn default() -> Self {
        Self::with_default_rules()
    }
}
