//! FlashCards provider contract.
//!
//! Authority, permission, column names and locator paths of the FlashCards
//! content provider. Paths are relative to [`AUTHORITY`]; use [`locator`] for
//! an absolute [`ResourceLocator`].

use core_bridge::{ResourceLocator, Result};

pub use core_runtime::config::{DEFAULT_AUTHORITY as AUTHORITY, DEFAULT_PERMISSION as PERMISSION};

/// Deck that new cards land in unless moved.
pub const DEFAULT_DECK_ID: i64 = 1;

/// Separates the fields of a note inside `flds`.
pub const FIELD_SEPARATOR: char = '\u{1f}';

pub mod note {
    pub const ID: &str = "_id";
    pub const GUID: &str = "guid";
    pub const MID: &str = "mid";
    pub const MOD: &str = "mod";
    pub const TAGS: &str = "tags";
    pub const FLDS: &str = "flds";
    pub const SFLD: &str = "sfld";

    pub const DEFAULT_PROJECTION: &[&str] = &[ID, GUID, MID, MOD, TAGS, FLDS, SFLD];
}

pub mod card {
    pub const NOTE_ID: &str = "note_id";
    pub const ORD: &str = "ord";
    pub const NAME: &str = "card_name";
    pub const DECK_ID: &str = "deck_id";
    pub const QUESTION: &str = "question";
    pub const ANSWER: &str = "answer";

    pub const DEFAULT_PROJECTION: &[&str] = &[NOTE_ID, ORD, NAME, DECK_ID, QUESTION, ANSWER];
}

pub mod deck {
    pub const ID: &str = "deck_id";
    pub const NAME: &str = "deck_name";
    pub const DESC: &str = "deck_desc";
    pub const COUNTS: &str = "deck_count";

    pub const DEFAULT_PROJECTION: &[&str] = &[NAME, ID, COUNTS, DESC];
}

pub mod model {
    pub const ID: &str = "_id";
    pub const NAME: &str = "name";
    pub const FIELD_NAMES: &str = "field_names";
    pub const NUM_CARDS: &str = "num_cards";
    pub const CURRENT: &str = "current";

    pub const DEFAULT_PROJECTION: &[&str] = &[ID, NAME, FIELD_NAMES, NUM_CARDS];
}

pub fn notes() -> String {
    "notes".to_string()
}

pub fn note(note_id: i64) -> String {
    format!("notes/{note_id}")
}

pub fn cards(note_id: i64) -> String {
    format!("notes/{note_id}/cards")
}

pub fn card(note_id: i64, ord: u32) -> String {
    format!("notes/{note_id}/cards/{ord}")
}

pub fn models() -> String {
    "models".to_string()
}

pub fn model(model_id: i64) -> String {
    format!("models/{model_id}")
}

pub fn current_model() -> String {
    format!("models/{}", model::CURRENT)
}

pub fn decks() -> String {
    "decks".to_string()
}

pub fn selected_deck() -> String {
    "selected_deck".to_string()
}

pub fn schedule() -> String {
    "schedule".to_string()
}

pub fn media() -> String {
    "media".to_string()
}

/// Absolute locator for a contract path.
pub fn locator(path: &str) -> Result<ResourceLocator> {
    ResourceLocator::resolve(AUTHORITY, path)
}

pub fn join_fields<S: AsRef<str>>(fields: &[S]) -> String {
    let mut joined = String::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            joined.push(FIELD_SEPARATOR);
        }
        joined.push_str(field.as_ref());
    }
    joined
}

pub fn split_fields(flds: &str) -> Vec<String> {
    flds.split(FIELD_SEPARATOR).map(str::to_string).collect()
}

/// Space separated, with surrounding whitespace trimmed from each tag.
pub fn join_tags<S: AsRef<str>>(tags: &[S]) -> String {
    tags.iter()
        .map(|tag| tag.as_ref().trim())
        .filter(|tag| !tag.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split_whitespace().map(str::to_string).collect()
}
