use serde::{Deserialize, Serialize};

pub const DEFAULT_PRODUCTIVE_SITES: &[&str] = &[
    "github.com",
    "stackoverflow.com",
    "developer.mozilla.org",
    "w3schools.com",
    "codepen.io",
    "jsfiddle.net",
    "repl.it",
    "codesandbox.io",
    "leetcode.com",
    "hackerrank.com",
    "freecodecamp.org",
    "coursera.org",
    "udemy.com",
    "khanacademy.org",
    "edx.org",
    "pluralsight.com",
    "lynda.com",
];

pub const DEFAULT_UNPRODUCTIVE_SITES: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "instagram.com",
    "tiktok.com",
    "youtube.com",
    "netflix.com",
    "twitch.tv",
    "reddit.com",
    "pinterest.com",
    "snapchat.com",
    "linkedin.com",
    "whatsapp.com",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Productive,
    Unproductive,
    Neutral,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Productive => "productive",
            Category::Unproductive => "unproductive",
            Category::Neutral => "neutral",
        }
    }

    /// Unknown values fall back to neutral.
    pub fn parse(s: &str) -> Category {
        match s {
            "productive" => Category::Productive,
            "unproductive" => Category::Unproductive,
            _ => Category::Neutral,
        }
    }
}

/// Substring match against each list; the productive list is checked first, so a domain
/// listed in both is productive.
///
/// Matching is deliberately permissive: `notgithub.com.evil.org` matches `github.com`.
pub fn classify<S: AsRef<str>>(domain: &str, productive: &[S], unproductive: &[S]) -> Category {
    let hit = |list: &[S]| {
        list.iter()
            .map(|s| s.as_ref())
            .any(|site| !site.is_empty() && domain.contains(site))
    };
    if hit(productive) {
        Category::Productive
    } else if hit(unproductive) {
        Category::Unproductive
    } else {
        Category::Neutral
    }
}

pub fn default_productive_sites() -> Vec<String> {
    DEFAULT_PRODUCTIVE_SITES.iter().map(|s| s.to_string()).collect()
}

pub fn default_unproductive_sites() -> Vec<String> {
    DEFAULT_UNPRODUCTIVE_SITES.iter().map(|s| s.to_string()).collect()
}
