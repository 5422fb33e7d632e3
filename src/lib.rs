use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// What should happen to a title once a rule trigger matches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Action {
    Remove,
    Move { destination: String },
}

/// A single trigger/action pair. The trigger may carry one `_` anchor
/// marker: leading means "match only at the end of the title", trailing
/// means "match only at the start".
#[derive(Debug, Clone, Serialize)]
pub struct RuleEntry {
    pub trigger: String,
    pub action: Action,
}

impl RuleEntry {
    pub fn remove(trigger: &str) -> Self {
        Self {
            trigger: trigger.to_string(),
            action: Action::Remove,
        }
    }

    pub fn move_to(trigger: &str, destination: &str) -> Self {
        Self {
            trigger: trigger.to_string(),
            action: Action::Move {
                destination: destination.to_string(),
            },
        }
    }
}

/// The decided disposition of a title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Outcome {
    Kept { title: String },
    Removed,
    Moved { destination: String },
}

/// Outcome plus how many triggers matched. A count above one means the
/// rule table is ambiguous for this title; the last declared match won.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub outcome: Outcome,
    pub match_count: usize,
}

/// A host-agnostic menu node. Hosts map their own storage into this
/// shape before a sweep and apply the report afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub children: Vec<MenuEntry>,
}

/// A child that matched a move rule. Relocation itself is the host's
/// job; the sweep only records where the entry should end up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMove {
    pub slug: String,
    pub destination: String,
}

/// Result of sweeping a menu tree: the cleaned tree, the slugs that were
/// dropped, and the moves left for the host to carry out.
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub menu: Vec<MenuEntry>,
    pub removed: Vec<String>,
    pub moves: Vec<PendingMove>,
}

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

/// Ordered rule set plus the slugs a sweep must never touch.
///
/// Declaration order is significant: when several triggers match one
/// title, the last one in the table wins.
#[derive(Debug, Clone)]
pub struct RuleTable {
    entries: Vec<RuleEntry>,
    protected: Vec<String>,
}

impl RuleTable {
    pub fn new(entries: Vec<RuleEntry>) -> Self {
        Self {
            entries,
            protected: default_protected(),
        }
    }

    pub fn with_protected(entries: Vec<RuleEntry>, protected: Vec<String>) -> Self {
        Self { entries, protected }
    }

    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    pub fn is_protected(&self, slug: &str) -> bool {
        self.protected.iter().any(|s| s == slug)
    }

    /// Parse a TOML rule file. String action codes (`"r"`/`"m"`) are
    /// converted to [`Action`] here, at the configuration boundary, so
    /// the engine never branches on raw character codes.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawRuleFile = toml::from_str(text)?;

        let mut entries = Vec::with_capacity(raw.rules.len());
        for rule in raw.rules {
            let code = rule.action.to_lowercase();
            let action = match code.as_str() {
                "r" => Action::Remove,
                "m" => match rule.destination {
                    Some(destination) => Action::Move { destination },
                    None => {
                        return Err(ConfigError::MissingDestination {
                            trigger: rule.trigger,
                        })
                    }
                },
                _ => {
                    return Err(ConfigError::UnknownAction {
                        trigger: rule.trigger,
                        code,
                    })
                }
            };
            entries.push(RuleEntry {
                trigger: rule.trigger,
                action,
            });
        }

        Ok(Self {
            entries,
            protected: raw.protected.unwrap_or_else(default_protected),
        })
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        DEFAULT_RULES.clone()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse rule file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown action code {code:?} for trigger {trigger:?} (expected \"r\" or \"m\")")]
    UnknownAction { trigger: String, code: String },
    #[error("move rule {trigger:?} has no destination")]
    MissingDestination { trigger: String },
}

#[derive(Debug, Deserialize)]
struct RawRuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RawRule>,
    protected: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    trigger: String,
    action: String,
    destination: Option<String>,
}

static DEFAULT_RULES: Lazy<RuleTable> = Lazy::new(|| {
    RuleTable::new(vec![
        RuleEntry::remove("About_"),
        RuleEntry::remove("Add-on"),
        RuleEntry::remove("Add-ons"),
        RuleEntry::remove("Addon"),
        RuleEntry::remove("Addons"),
        RuleEntry::remove("Affiliat_"),
        RuleEntry::move_to("Dashboard", "dashboard.php"),
        RuleEntry::remove("Extend"),
        RuleEntry::remove("Integrations"),
        RuleEntry::remove("Other"),
        RuleEntry::remove("Premium_"),
        RuleEntry::remove("Pro"),
        RuleEntry::remove("_Trial"),
        RuleEntry::remove("Upgrade_"),
        RuleEntry::remove("Welcome"),
    ])
});

fn default_protected() -> Vec<String> {
    [
        "index.php",
        "edit.php",
        "upload.php",
        "edit.php?post_type=page",
        "edit-comments.php",
        "themes.php",
        "plugins.php",
        "users.php",
        "tools.php",
        "options-general.php",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ---------------------------------------------------------------------------
// Compiled patterns
// ---------------------------------------------------------------------------

// A numeric badge is a digit run wrapped in a span, e.g. an unread count.
static BADGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<span[^>]*>(\d+)</span>").unwrap());

static BADGE_BLANK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(<span[^>]*>)\d+(</span>)").unwrap());

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

// ---------------------------------------------------------------------------
// Title normalization
// ---------------------------------------------------------------------------

/// Strip markup and promotional cruft from a raw title.
///
/// A numeric badge found inside a span is lifted out before the tags are
/// stripped, then re-appended in a uniform span so counters survive the
/// cleanup. A badge of zero is never re-added. Trailing `" new"` /
/// `" new!"` flags are dropped.
///
/// Total and idempotent; malformed markup just passes through the tag
/// strip untouched.
pub fn normalize(raw: &str) -> String {
    let badge = BADGE_RE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok());

    let title = BADGE_BLANK_RE.replace_all(raw, "$1$2");
    let title = title.replace("&nbsp;", " ");
    let stripped = TAG_RE.replace_all(&title, "");
    let decoded = html_escape::decode_html_entities(stripped.as_ref());
    let mut title = decoded.trim().to_string();

    if let Some(count) = badge.filter(|n| *n > 0) {
        title.push_str(&format!(
            r#"<span class="update-plugins count-{count}">{count}</span>"#
        ));
    }

    strip_new_flag(&title).trim().to_string()
}

fn strip_new_flag(title: &str) -> &str {
    let mut t = title.trim_end();
    if ends_with_ignore_case(t, " new") {
        t = &t[..t.len() - 4];
    }
    if ends_with_ignore_case(t, " new!") {
        t = &t[..t.len() - 5];
    }
    t
}

// ASCII-only suffixes, so slicing at the matched length stays on a char
// boundary.
fn ends_with_ignore_case(s: &str, suffix: &str) -> bool {
    s.len() >= suffix.len()
        && s.as_bytes()[s.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

// ---------------------------------------------------------------------------
// Word matching
// ---------------------------------------------------------------------------

/// Test whether a trigger matches inside a title, case-insensitively.
///
/// A leading `_` anchors the trigger to the end of the title, a trailing
/// `_` to the start. An unanchored trigger must be the whole title or a
/// whole word at a space boundary, so `"pro"` matches `"going pro"` but
/// not `"proxy settings"`.
pub fn matches(trigger: &str, title: &str) -> bool {
    let trigger = trigger.to_lowercase();
    let title = title.to_lowercase();

    if let Some(tail) = trigger.strip_prefix('_') {
        return title.ends_with(tail);
    }
    if let Some(head) = trigger.strip_suffix('_') {
        return title.starts_with(head);
    }

    title == trigger
        || title.starts_with(&format!("{trigger} "))
        || title.ends_with(&format!(" {trigger}"))
        || title.contains(&format!(" {trigger} "))
}

// ---------------------------------------------------------------------------
// Rule resolution
// ---------------------------------------------------------------------------

/// Resolve a cleaned title against the built-in rule table.
pub fn resolve(title: &str) -> Resolution {
    resolve_with(&DEFAULT_RULES, title)
}

/// Resolve a cleaned title against a specific rule table.
///
/// Every entry is tested in declared order; if more than one matches,
/// the last one wins and a warning is logged. Never fails: a title that
/// matches nothing is kept unchanged.
pub fn resolve_with(table: &RuleTable, title: &str) -> Resolution {
    let mut last: Option<&RuleEntry> = None;
    let mut match_count = 0usize;

    for entry in table.entries() {
        if matches(&entry.trigger, title) {
            tracing::debug!(trigger = %entry.trigger, %title, "trigger matched");
            last = Some(entry);
            match_count += 1;
        }
    }

    if match_count > 1 {
        tracing::warn!(
            %title,
            match_count,
            "multiple triggers matched one title; last match wins"
        );
    }

    let outcome = match last {
        None => Outcome::Kept {
            title: title.to_string(),
        },
        Some(entry) => match &entry.action {
            Action::Remove => Outcome::Removed,
            Action::Move { destination } => Outcome::Moved {
                destination: destination.clone(),
            },
        },
    };

    Resolution {
        outcome,
        match_count,
    }
}

// ---------------------------------------------------------------------------
// Menu sweep
// ---------------------------------------------------------------------------

/// Sweep a menu tree: normalize titles, drop blank entries, apply rule
/// outcomes to children, and drop parents that removals emptied out.
///
/// Protected slugs pass through verbatim. The input is never mutated;
/// the host applies the returned report to its own state.
pub fn sweep(menu: &[MenuEntry], table: &RuleTable) -> SweepReport {
    let mut report = SweepReport::default();

    for entry in menu {
        if table.is_protected(&entry.slug) {
            report.menu.push(entry.clone());
            continue;
        }

        if entry.title.trim().is_empty() {
            tracing::debug!(slug = %entry.slug, "removed blank entry");
            report.removed.push(entry.slug.clone());
            continue;
        }

        let title = normalize(&entry.title);
        let had_children = !entry.children.is_empty();
        let mut kept_children = Vec::new();
        let mut any_removed = false;

        for child in &entry.children {
            if child.title.trim().is_empty() {
                tracing::debug!(slug = %child.slug, "removed blank sub-entry");
                report.removed.push(child.slug.clone());
                any_removed = true;
                continue;
            }

            let child_title = normalize(&child.title);
            let resolution = resolve_with(table, &child_title);
            match resolution.outcome {
                Outcome::Kept { title } => kept_children.push(MenuEntry {
                    title,
                    slug: child.slug.clone(),
                    children: child.children.clone(),
                }),
                Outcome::Removed => {
                    tracing::debug!(slug = %child.slug, "removed sub-entry");
                    report.removed.push(child.slug.clone());
                    any_removed = true;
                }
                Outcome::Moved { destination } => {
                    tracing::debug!(slug = %child.slug, %destination, "sub-entry marked for move");
                    report.moves.push(PendingMove {
                        slug: child.slug.clone(),
                        destination,
                    });
                }
            }
        }

        if had_children && kept_children.is_empty() && any_removed {
            tracing::debug!(slug = %entry.slug, "entry emptied by removals, removing it");
            report.removed.push(entry.slug.clone());
            continue;
        }

        report.menu.push(MenuEntry {
            title,
            slug: entry.slug.clone(),
            children: kept_children,
        });
    }

    report
}
