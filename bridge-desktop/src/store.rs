//! In-memory content store behind the simulated provider.
//!
//! Rows live in collections addressed by URI path. A path whose last segment
//! is numeric addresses one item of the collection named by the preceding
//! segments, so `notes/7/cards/0` is item `0` of collection `notes/7/cards`.
//! Every row carries an integer `_id` column.
//!
//! Selections understand the small grammar the bridge's callers use:
//! `col = ?`, `col = 'literal'`, `col = 12` joined with `AND`, plus the
//! search token `tag:<name>` which matches the whitespace separated `tags`
//! column. Anything else is rejected the way SQLite rejects bad SQL.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

pub const ID_COLUMN: &str = "_id";

/// A stored column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
}

impl Cell {
    fn as_match_text(&self) -> Option<String> {
        match self {
            Cell::Text(value) => Some(value.clone()),
            Cell::Integer(value) => Some(value.to_string()),
            Cell::Real(value) => Some(value.to_string()),
            Cell::Null | Cell::Blob(_) => None,
        }
    }

    fn sort_cmp(&self, other: &Cell) -> Ordering {
        fn rank(cell: &Cell) -> u8 {
            match cell {
                Cell::Null => 0,
                Cell::Integer(_) | Cell::Real(_) => 1,
                Cell::Text(_) => 2,
                Cell::Blob(_) => 3,
            }
        }
        match (self, other) {
            (Cell::Integer(a), Cell::Integer(b)) => a.cmp(b),
            (Cell::Integer(a), Cell::Real(b)) => (*a as f64).total_cmp(b),
            (Cell::Real(a), Cell::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Cell::Real(a), Cell::Real(b)) => a.total_cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (Cell::Blob(a), Cell::Blob(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

pub type Row = IndexMap<String, Cell>;

/// Store-level failures, surfaced to the caller as host exceptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Maps to `java.lang.IllegalArgumentException`.
    IllegalArgument(String),
}

impl StoreError {
    fn illegal(message: impl Into<String>) -> Self {
        StoreError::IllegalArgument(message.into())
    }
}

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Rows produced by a query, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    columns: Vec<String>,
    rows: BTreeMap<i64, Row>,
}

impl Table {
    fn with_columns(columns: &[&str]) -> Self {
        let mut table = Table::default();
        table.columns.push(ID_COLUMN.to_string());
        for column in columns {
            if *column != ID_COLUMN {
                table.columns.push((*column).to_string());
            }
        }
        table
    }

    fn knows(&self, column: &str) -> bool {
        self.columns.iter().any(|known| known == column)
    }
}

#[derive(Debug, Default)]
struct Provider {
    /// Collections registered up front have a fixed column set.
    fixed: HashMap<String, bool>,
    tables: HashMap<String, Table>,
}

/// Parsed `content://authority/a/b/c` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriParts {
    pub authority: String,
    pub segments: Vec<String>,
}

impl UriParts {
    pub fn parse(uri: &str) -> StoreResult<Self> {
        let rest = uri
            .strip_prefix("content://")
            .ok_or_else(|| StoreError::illegal(format!("Unknown URL {uri}")))?;
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let mut parts = rest.split('/');
        let authority = parts.next().unwrap_or_default().to_string();
        if authority.is_empty() {
            return Err(StoreError::illegal(format!("Unknown URL {uri}")));
        }
        let segments = parts
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            authority,
            segments,
        })
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    fn target(&self, uri: &str) -> StoreResult<Target> {
        match self.segments.as_slice() {
            [] => Err(StoreError::illegal(format!("Unknown URL {uri}"))),
            [.., last] if self.segments.len() >= 2 => match last.parse::<i64>() {
                Ok(id) => Ok(Target {
                    collection: self.segments[..self.segments.len() - 1].join("/"),
                    item: Some(id),
                }),
                Err(_) => Ok(Target {
                    collection: self.segments.join("/"),
                    item: None,
                }),
            },
            _ => Ok(Target {
                collection: self.segments.join("/"),
                item: None,
            }),
        }
    }
}

struct Target {
    collection: String,
    item: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Arg(usize),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Tag(String),
    Equals(String, Operand),
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn split_conjunction(selection: &str) -> Vec<&str> {
    let lower = selection.to_ascii_lowercase();
    let mut clauses = Vec::new();
    let mut start = 0;
    let mut search = 0;
    while let Some(offset) = lower[search..].find(" and ") {
        let at = search + offset;
        clauses.push(&selection[start..at]);
        start = at + " and ".len();
        search = start;
    }
    clauses.push(&selection[start..]);
    clauses
}

fn parse_selection(selection: &str, arg_count: usize) -> StoreResult<Vec<Predicate>> {
    let selection = selection.trim();
    if selection.is_empty() {
        if arg_count > 0 {
            return Err(StoreError::illegal(
                "Cannot bind argument at index 1 because the index is out of range.  \
                 The statement has 0 parameters.",
            ));
        }
        return Ok(Vec::new());
    }

    let mut predicates = Vec::new();
    let mut next_arg = 0;
    for clause in split_conjunction(selection) {
        let clause = clause.trim();
        if let Some(tag) = clause.strip_prefix("tag:") {
            if tag.is_empty() {
                return Err(StoreError::illegal(format!("empty tag in selection: {selection}")));
            }
            predicates.push(Predicate::Tag(tag.to_string()));
            continue;
        }

        let (column, operand) = clause
            .split_once('=')
            .ok_or_else(|| StoreError::illegal(format!("unsupported selection: {selection}")))?;
        let column = column.trim();
        let operand = operand.trim();
        if !is_identifier(column) {
            return Err(StoreError::illegal(format!("unsupported selection: {selection}")));
        }

        let operand = if operand == "?" {
            next_arg += 1;
            Operand::Arg(next_arg - 1)
        } else if let Some(quoted) = operand
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
        {
            Operand::Literal(quoted.replace("''", "'"))
        } else if operand.parse::<f64>().is_ok() {
            Operand::Literal(operand.to_string())
        } else {
            return Err(StoreError::illegal(format!("unsupported selection: {selection}")));
        };
        predicates.push(Predicate::Equals(column.to_string(), operand));
    }

    if next_arg != arg_count {
        return Err(StoreError::illegal(format!(
            "Cannot bind argument at index {} because the index is out of range.  \
             The statement has {} parameters.",
            arg_count, next_arg
        )));
    }
    Ok(predicates)
}

fn matches(row: &Row, predicates: &[Predicate], args: &[String]) -> bool {
    predicates.iter().all(|predicate| match predicate {
        Predicate::Tag(tag) => match row.get("tags") {
            Some(Cell::Text(tags)) => tags
                .split_whitespace()
                .any(|candidate| candidate.eq_ignore_ascii_case(tag)),
            _ => false,
        },
        Predicate::Equals(column, operand) => {
            let expected = match operand {
                Operand::Arg(index) => args.get(*index).map(String::as_str),
                Operand::Literal(literal) => Some(literal.as_str()),
            };
            match (row.get(column).and_then(Cell::as_match_text), expected) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => false,
            }
        }
    })
}

/// All providers known to a host, keyed by authority.
#[derive(Debug, Default)]
pub struct ContentStore {
    providers: HashMap<String, Provider>,
}

impl ContentStore {
    pub fn register_provider(&mut self, authority: &str) {
        self.providers.entry(authority.to_string()).or_default();
    }

    pub fn register_collection(&mut self, authority: &str, collection: &str, columns: &[&str]) {
        let provider = self.providers.entry(authority.to_string()).or_default();
        provider.fixed.insert(collection.to_string(), true);
        provider
            .tables
            .insert(collection.to_string(), Table::with_columns(columns));
    }

    pub fn has_provider(&self, authority: &str) -> bool {
        self.providers.contains_key(authority)
    }

    fn provider_mut(&mut self, uri: &str, parts: &UriParts) -> StoreResult<&mut Provider> {
        self.providers
            .get_mut(&parts.authority)
            .ok_or_else(|| StoreError::illegal(format!("Unknown URL {uri}")))
    }

    /// `Ok(None)` when no provider is registered for the authority.
    pub fn query(
        &mut self,
        uri: &str,
        projection: Option<&[String]>,
        selection: Option<&str>,
        args: &[String],
        sort_order: Option<&str>,
    ) -> StoreResult<Option<QueryResult>> {
        let parts = UriParts::parse(uri)?;
        let Some(provider) = self.providers.get(&parts.authority) else {
            return Ok(None);
        };
        if parts.segments.is_empty() {
            // Authority root: answers with no rows, used as an availability probe.
            return Ok(Some(QueryResult {
                columns: vec![ID_COLUMN.to_string()],
                rows: Vec::new(),
            }));
        }
        let target = parts.target(uri)?;
        let predicates = parse_selection(selection.unwrap_or_default(), args.len())?;
        let fixed = provider.fixed.contains_key(&target.collection);
        let empty = Table::with_columns(&[]);
        let table = provider.tables.get(&target.collection).unwrap_or(&empty);

        let columns: Vec<String> = match projection {
            Some(requested) if !requested.is_empty() => {
                if fixed {
                    if let Some(unknown) = requested.iter().find(|column| !table.knows(column)) {
                        return Err(StoreError::illegal(format!("Invalid column {unknown}")));
                    }
                }
                requested.to_vec()
            }
            _ => table.columns.clone(),
        };

        let mut selected: Vec<&Row> = table
            .rows
            .iter()
            .filter(|(id, _)| target.item.map_or(true, |item| item == **id))
            .map(|(_, row)| row)
            .filter(|row| matches(row, &predicates, args))
            .collect();

        if let Some(order) = sort_order.map(str::trim).filter(|order| !order.is_empty()) {
            let mut words = order.split_whitespace();
            let column = words.next().unwrap_or_default();
            let descending = match words.next().map(str::to_ascii_uppercase).as_deref() {
                None | Some("ASC") => false,
                Some("DESC") => true,
                Some(_) => {
                    return Err(StoreError::illegal(format!("unsupported sort order: {order}")))
                }
            };
            if !is_identifier(column) || words.next().is_some() || !table.knows(column) {
                return Err(StoreError::illegal(format!("unsupported sort order: {order}")));
            }
            selected.sort_by(|a, b| {
                let a = a.get(column).unwrap_or(&Cell::Null);
                let b = b.get(column).unwrap_or(&Cell::Null);
                let ordering = a.sort_cmp(b);
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let rows = selected
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();

        Ok(Some(QueryResult { columns, rows }))
    }

    /// Returns the URI of the new row.
    pub fn insert(&mut self, uri: &str, values: Row) -> StoreResult<String> {
        let parts = UriParts::parse(uri)?;
        let provider = self.provider_mut(uri, &parts)?;
        let target = parts.target(uri)?;
        if target.item.is_some() {
            return Err(StoreError::illegal(format!("Unsupported URI for insert: {uri}")));
        }
        let fixed = provider.fixed.contains_key(&target.collection);
        let table = provider
            .tables
            .entry(target.collection.clone())
            .or_insert_with(|| Table::with_columns(&[]));
        admit_columns(table, fixed, &values)?;

        table.next_id += 1;
        let id = table.next_id;
        let mut row = Row::new();
        row.insert(ID_COLUMN.to_string(), Cell::Integer(id));
        for (column, value) in values {
            if column != ID_COLUMN {
                row.insert(column, value);
            }
        }
        table.rows.insert(id, row);

        Ok(format!(
            "content://{}/{}/{}",
            parts.authority, target.collection, id
        ))
    }

    pub fn update(
        &mut self,
        uri: &str,
        values: Row,
        selection: Option<&str>,
        args: &[String],
    ) -> StoreResult<i32> {
        let parts = UriParts::parse(uri)?;
        let provider = self.provider_mut(uri, &parts)?;
        let target = parts.target(uri)?;
        let predicates = parse_selection(selection.unwrap_or_default(), args.len())?;
        let fixed = provider.fixed.contains_key(&target.collection);
        let Some(table) = provider.tables.get_mut(&target.collection) else {
            return Ok(0);
        };
        admit_columns(table, fixed, &values)?;

        let mut affected = 0;
        for (id, row) in table.rows.iter_mut() {
            if target.item.map_or(true, |item| item == *id) && matches(row, &predicates, args) {
                for (column, value) in &values {
                    if column != ID_COLUMN {
                        row.insert(column.clone(), value.clone());
                    }
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    pub fn delete(&mut self, uri: &str, selection: Option<&str>, args: &[String]) -> StoreResult<i32> {
        let parts = UriParts::parse(uri)?;
        let provider = self.provider_mut(uri, &parts)?;
        let target = parts.target(uri)?;
        let predicates = parse_selection(selection.unwrap_or_default(), args.len())?;
        let Some(table) = provider.tables.get_mut(&target.collection) else {
            return Ok(0);
        };

        let doomed: Vec<i64> = table
            .rows
            .iter()
            .filter(|(id, row)| {
                target.item.map_or(true, |item| item == **id) && matches(row, &predicates, args)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            table.rows.remove(id);
        }
        Ok(doomed.len() as i32)
    }

    /// Number of rows currently stored in a collection.
    pub fn row_count(&self, authority: &str, collection: &str) -> usize {
        self.providers
            .get(authority)
            .and_then(|provider| provider.tables.get(collection))
            .map_or(0, |table| table.rows.len())
    }
}

fn admit_columns(table: &mut Table, fixed: bool, values: &Row) -> StoreResult<()> {
    for column in values.keys() {
        if column == ID_COLUMN || table.knows(column) {
            continue;
        }
        if fixed || !is_identifier(column) {
            return Err(StoreError::illegal(format!("Unknown column {column}")));
        }
        table.columns.push(column.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH: &str = "content://test.provider";

    fn note(flds: &str, tags: &str) -> Row {
        let mut row = Row::new();
        row.insert("flds".to_string(), Cell::Text(flds.to_string()));
        row.insert("tags".to_string(), Cell::Text(tags.to_string()));
        row.insert("did".to_string(), Cell::Integer(1));
        row
    }

    fn store() -> ContentStore {
        let mut store = ContentStore::default();
        store.register_provider("test.provider");
        store
    }

    #[test]
    fn test_insert_assigns_ids() {
        let mut store = store();
        let first = store.insert(&format!("{AUTH}/notes"), note("a", "")).unwrap();
        let second = store.insert(&format!("{AUTH}/notes"), note("b", "")).unwrap();
        assert_eq!(first, "content://test.provider/notes/1");
        assert_eq!(second, "content://test.provider/notes/2");
    }

    #[test]
    fn test_tag_and_equality_selection() {
        let mut store = store();
        let uri = format!("{AUTH}/notes");
        store.insert(&uri, note("a", "important later")).unwrap();
        store.insert(&uri, note("b", "later")).unwrap();

        let tagged = store
            .query(&uri, None, Some("tag:important"), &[], None)
            .unwrap()
            .unwrap();
        assert_eq!(tagged.rows.len(), 1);
        assert_eq!(tagged.columns, vec!["_id", "flds", "tags", "did"]);

        let by_field = store
            .query(
                &uri,
                Some(&["flds".to_string()]),
                Some("flds = ? AND did = 1"),
                &["b".to_string()],
                None,
            )
            .unwrap()
            .unwrap();
        assert_eq!(by_field.rows, vec![vec![Cell::Text("b".to_string())]]);
    }

    #[test]
    fn test_argument_count_mismatch_is_rejected() {
        let mut store = store();
        let err = store
            .query(&format!("{AUTH}/notes"), None, Some("flds = ?"), &[], None)
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalArgument(_)));
    }

    #[test]
    fn test_unknown_authority() {
        let mut store = store();
        let missing = "content://missing.provider/notes";
        assert_eq!(store.query(missing, None, None, &[], None).unwrap(), None);
        assert!(store.insert(missing, note("a", "")).is_err());
    }

    #[test]
    fn test_item_addressing_update_and_delete() {
        let mut store = store();
        let uri = format!("{AUTH}/notes");
        store.insert(&uri, note("a", "")).unwrap();
        store.insert(&uri, note("b", "")).unwrap();

        let mut change = Row::new();
        change.insert("tags".to_string(), Cell::Text("edited".to_string()));
        assert_eq!(store.update(&format!("{uri}/2"), change, None, &[]).unwrap(), 1);
        assert_eq!(store.delete(&format!("{uri}/1"), None, &[]).unwrap(), 1);
        assert_eq!(store.row_count("test.provider", "notes"), 1);

        // Sub-collection that was never written to.
        let mut deck = Row::new();
        deck.insert("deck_id".to_string(), Cell::Integer(2));
        assert_eq!(store.update(&format!("{uri}/2/cards/0"), deck, None, &[]).unwrap(), 0);
    }

    #[test]
    fn test_fixed_collection_rejects_unknown_columns() {
        let mut store = ContentStore::default();
        store.register_collection("test.provider", "decks", &["name"]);
        let uri = format!("{AUTH}/decks");
        let err = store
            .query(&uri, Some(&["color".to_string()]), None, &[], None)
            .unwrap_err();
        assert_eq!(err, StoreError::IllegalArgument("Invalid column color".to_string()));
    }

    #[test]
    fn test_sort_order() {
        let mut store = store();
        let uri = format!("{AUTH}/notes");
        store.insert(&uri, note("b", "")).unwrap();
        store.insert(&uri, note("a", "")).unwrap();
        let result = store
            .query(&uri, Some(&["flds".to_string()]), None, &[], Some("flds DESC"))
            .unwrap()
            .unwrap();
        assert_eq!(result.rows[0], vec![Cell::Text("b".to_string())]);
    }
}
