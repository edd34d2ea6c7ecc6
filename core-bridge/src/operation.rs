//! Content operation descriptors and their builder.
//!
//! An [`OperationBuilder`] collects the parts of one request and checks
//! them together in [`OperationBuilder::build`]. A builder builds exactly
//! once: after `build()`, successful or not, every call on it fails with
//! [`BridgeError::BuilderReused`].

use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::locator::ResourceLocator;
use crate::value::ValueMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Query,
    Insert,
    Update,
    Delete,
    BulkInsert,
}

impl OperationKind {
    pub fn is_write(self) -> bool {
        matches!(self, OperationKind::Insert | OperationKind::Update)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Query => "query",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::BulkInsert => "bulk_insert",
        };
        f.write_str(name)
    }
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortSpec {
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.descending { "DESC" } else { "ASC" };
        write!(f, "{} {direction}", self.column)
    }
}

/// Selection template with `?` placeholders and its bound arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub template: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Filter {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Placeholders outside single-quoted literals.
    pub fn placeholder_count(&self) -> usize {
        let mut quoted = false;
        let mut count = 0;
        for c in self.template.chars() {
            match c {
                '\'' => quoted = !quoted,
                '?' if !quoted => count += 1,
                _ => {}
            }
        }
        count
    }
}

/// A fully validated request. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    kind: OperationKind,
    locator: ResourceLocator,
    projection: Vec<String>,
    filter: Option<Filter>,
    values: ValueMap,
    rows: Vec<ValueMap>,
    sort: Vec<SortSpec>,
    #[serde(default)]
    row_limit: Option<usize>,
}

impl OperationDescriptor {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    /// Requested columns; empty means all.
    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    /// Rows of a bulk insert.
    pub fn rows(&self) -> &[ValueMap] {
        &self.rows
    }

    pub fn sort(&self) -> &[SortSpec] {
        &self.sort
    }

    /// Rows a query reads at most.
    pub fn row_limit(&self) -> Option<usize> {
        self.row_limit
    }

    /// Host sort clause, e.g. `"due ASC, id DESC"`.
    pub fn sort_clause(&self) -> Option<String> {
        if self.sort.is_empty() {
            return None;
        }
        let terms: Vec<String> = self.sort.iter().map(ToString::to_string).collect();
        Some(terms.join(", "))
    }
}

/// Single-use builder for [`OperationDescriptor`].
///
/// ```ignore
/// let mut builder = OperationBuilder::query();
/// builder
///     .for_resource(notes)?
///     .with_projection(["_id", "flds"])?
///     .with_filter("tag:important", Vec::<String>::new())?;
/// let descriptor = builder.build()?;
/// ```
#[derive(Debug)]
pub struct OperationBuilder {
    kind: OperationKind,
    locator: Option<ResourceLocator>,
    projection: Vec<String>,
    filter: Option<Filter>,
    values: Option<ValueMap>,
    rows: Option<Vec<ValueMap>>,
    sort: Vec<SortSpec>,
    row_limit: Option<usize>,
    built: bool,
}

impl OperationBuilder {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            locator: None,
            projection: Vec::new(),
            filter: None,
            values: None,
            rows: None,
            sort: Vec::new(),
            row_limit: None,
            built: false,
        }
    }

    pub fn query() -> Self {
        Self::new(OperationKind::Query)
    }

    pub fn insert() -> Self {
        Self::new(OperationKind::Insert)
    }

    pub fn update() -> Self {
        Self::new(OperationKind::Update)
    }

    pub fn delete() -> Self {
        Self::new(OperationKind::Delete)
    }

    pub fn bulk_insert() -> Self {
        Self::new(OperationKind::BulkInsert)
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn for_resource(&mut self, locator: ResourceLocator) -> Result<&mut Self> {
        self.ensure_unbuilt()?;
        self.locator = Some(locator);
        Ok(self)
    }

    pub fn with_projection<I, S>(&mut self, fields: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_unbuilt()?;
        self.projection = fields.into_iter().map(Into::into).collect();
        Ok(self)
    }

    pub fn with_filter<I, S>(&mut self, template: impl Into<String>, args: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_unbuilt()?;
        self.filter = Some(Filter {
            template: template.into(),
            args: args.into_iter().map(Into::into).collect(),
        });
        Ok(self)
    }

    pub fn with_values(&mut self, values: ValueMap) -> Result<&mut Self> {
        self.ensure_unbuilt()?;
        self.values = Some(values);
        Ok(self)
    }

    pub fn with_rows(&mut self, rows: Vec<ValueMap>) -> Result<&mut Self> {
        self.ensure_unbuilt()?;
        self.rows = Some(rows);
        Ok(self)
    }

    /// Appends an ordering term.
    pub fn with_sort(&mut self, sort: SortSpec) -> Result<&mut Self> {
        self.ensure_unbuilt()?;
        self.sort.push(sort);
        Ok(self)
    }

    /// Stops the query after `rows` rows. Zero still runs the query, so it
    /// only checks that the provider answers.
    pub fn with_row_limit(&mut self, rows: usize) -> Result<&mut Self> {
        self.ensure_unbuilt()?;
        self.row_limit = Some(rows);
        Ok(self)
    }

    /// Validates and produces the descriptor. The builder is spent either way.
    pub fn build(&mut self) -> Result<OperationDescriptor> {
        self.ensure_unbuilt()?;
        self.built = true;

        let kind = self.kind;
        let locator = self
            .locator
            .take()
            .ok_or_else(|| invalid(format!("{kind} has no target resource")))?;
        let projection = mem::take(&mut self.projection);
        let filter = self.filter.take();
        let values = self.values.take();
        let rows = self.rows.take();
        let sort = mem::take(&mut self.sort);
        let row_limit = self.row_limit.take();

        if kind != OperationKind::Query {
            if row_limit.is_some() {
                return Err(invalid(format!("{kind} cannot carry a row limit")));
            }
            if !projection.is_empty() {
                return Err(invalid(format!("{kind} cannot carry a projection")));
            }
            if !sort.is_empty() {
                return Err(invalid(format!("{kind} cannot carry a sort order")));
            }
        }
        if let Some(empty) = projection.iter().find(|field| field.trim().is_empty()) {
            return Err(invalid(format!("blank projection field '{empty}'")));
        }
        if let Some(blank) = sort.iter().find(|term| term.column.trim().is_empty()) {
            return Err(invalid(format!("blank sort column in '{blank}'")));
        }

        match kind {
            OperationKind::Insert | OperationKind::Update => {
                if values.as_ref().map_or(true, ValueMap::is_empty) {
                    return Err(invalid(format!("{kind} requires a non-empty value map")));
                }
            }
            OperationKind::Query | OperationKind::Delete | OperationKind::BulkInsert => {
                if values.is_some() {
                    return Err(invalid(format!("{kind} cannot carry a value map")));
                }
            }
        }

        match (kind, &rows) {
            (OperationKind::BulkInsert, None) => {
                return Err(invalid("bulk_insert requires at least one row"));
            }
            (OperationKind::BulkInsert, Some(rows)) => {
                if rows.is_empty() {
                    return Err(invalid("bulk_insert requires at least one row"));
                }
                if let Some(position) = rows.iter().position(ValueMap::is_empty) {
                    return Err(invalid(format!("bulk_insert row {position} is empty")));
                }
            }
            (_, Some(_)) => return Err(invalid(format!("{kind} cannot carry rows"))),
            (_, None) => {}
        }

        if let Some(filter) = &filter {
            if matches!(kind, OperationKind::Insert | OperationKind::BulkInsert) {
                return Err(invalid(format!("{kind} cannot carry a filter")));
            }
            let placeholders = filter.placeholder_count();
            if placeholders != filter.args.len() {
                return Err(invalid(format!(
                    "filter has {placeholders} placeholders but {} arguments",
                    filter.args.len()
                )));
            }
        }

        Ok(OperationDescriptor {
            kind,
            locator,
            projection,
            filter,
            values: values.unwrap_or_default(),
            rows: rows.unwrap_or_default(),
            sort,
            row_limit,
        })
    }

    fn ensure_unbuilt(&self) -> Result<()> {
        if self.built {
            return Err(BridgeError::BuilderReused);
        }
        Ok(())
    }
}

fn invalid(detail: impl Into<String>) -> BridgeError {
    BridgeError::InvalidOperation(detail.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes() -> ResourceLocator {
        ResourceLocator::resolve("com.ichi2.anki.flashcards", "notes").unwrap()
    }

    fn note_values() -> ValueMap {
        ValueMap::new()
            .with("flds", "Q\u{1f}A")
            .with("tags", "")
            .with("did", 1i64)
    }

    #[test]
    fn test_query_descriptor() {
        let mut builder = OperationBuilder::query();
        builder
            .for_resource(notes())
            .unwrap()
            .with_projection(["_id", "flds"])
            .unwrap()
            .with_filter("tags = ? AND mid = ?", ["a", "7"])
            .unwrap()
            .with_sort(SortSpec::descending("_id"))
            .unwrap()
            .with_sort(SortSpec::ascending("flds"))
            .unwrap();
        let descriptor = builder.build().unwrap();

        assert_eq!(descriptor.kind(), OperationKind::Query);
        assert_eq!(descriptor.projection(), ["_id", "flds"]);
        assert_eq!(descriptor.filter().unwrap().args, vec!["a", "7"]);
        assert_eq!(descriptor.sort_clause().as_deref(), Some("_id DESC, flds ASC"));
        assert!(descriptor.values().is_empty());
    }

    #[test]
    fn test_write_requires_values() {
        for kind in [OperationKind::Insert, OperationKind::Update] {
            let mut builder = OperationBuilder::new(kind);
            builder.for_resource(notes()).unwrap();
            assert!(matches!(builder.build(), Err(BridgeError::InvalidOperation(_))));

            let mut builder = OperationBuilder::new(kind);
            builder
                .for_resource(notes())
                .unwrap()
                .with_values(ValueMap::new())
                .unwrap();
            assert!(matches!(builder.build(), Err(BridgeError::InvalidOperation(_))));
        }
    }

    #[test]
    fn test_query_rejects_values() {
        let mut builder = OperationBuilder::query();
        builder
            .for_resource(notes())
            .unwrap()
            .with_values(note_values())
            .unwrap();
        assert!(matches!(builder.build(), Err(BridgeError::InvalidOperation(_))));
    }

    #[test]
    fn test_placeholder_mismatch() {
        let mut builder = OperationBuilder::delete();
        builder
            .for_resource(notes())
            .unwrap()
            .with_filter("_id = ? AND tags = '?'", Vec::<String>::new())
            .unwrap();
        let err = builder.build().unwrap_err();
        assert_eq!(
            err,
            BridgeError::InvalidOperation("filter has 1 placeholders but 0 arguments".to_string())
        );

        // Quoted question marks are literals.
        let filter = Filter::new("flds = 'why?' AND _id = ?");
        assert_eq!(filter.placeholder_count(), 1);
    }

    #[test]
    fn test_build_twice_is_reuse_both_times() {
        let mut builder = OperationBuilder::insert();
        builder
            .for_resource(notes())
            .unwrap()
            .with_values(note_values())
            .unwrap();
        assert!(builder.build().is_ok());
        assert_eq!(builder.build().unwrap_err(), BridgeError::BuilderReused);
        assert_eq!(builder.build().unwrap_err(), BridgeError::BuilderReused);
        assert_eq!(
            builder.with_values(note_values()).unwrap_err(),
            BridgeError::BuilderReused
        );
    }

    #[test]
    fn test_failed_build_is_terminal() {
        let mut builder = OperationBuilder::update();
        assert!(matches!(builder.build(), Err(BridgeError::InvalidOperation(_))));
        assert!(builder.is_built());
        assert_eq!(
            builder.for_resource(notes()).unwrap_err(),
            BridgeError::BuilderReused
        );
        assert_eq!(builder.build().unwrap_err(), BridgeError::BuilderReused);
    }

    #[test]
    fn test_bulk_insert_rows() {
        let mut builder = OperationBuilder::bulk_insert();
        builder.for_resource(notes()).unwrap();
        assert!(builder.build().is_err());

        let mut builder = OperationBuilder::bulk_insert();
        builder
            .for_resource(notes())
            .unwrap()
            .with_rows(vec![note_values(), ValueMap::new()])
            .unwrap();
        assert_eq!(
            builder.build().unwrap_err(),
            BridgeError::InvalidOperation("bulk_insert row 1 is empty".to_string())
        );

        let mut builder = OperationBuilder::bulk_insert();
        builder
            .for_resource(notes())
            .unwrap()
            .with_rows(vec![note_values(), note_values()])
            .unwrap();
        assert_eq!(builder.build().unwrap().rows().len(), 2);
    }

    #[test]
    fn test_projection_only_on_queries() {
        let mut builder = OperationBuilder::delete();
        builder
            .for_resource(notes())
            .unwrap()
            .with_projection(["_id"])
            .unwrap();
        assert!(matches!(builder.build(), Err(BridgeError::InvalidOperation(_))));
    }

    #[test]
    fn test_row_limit_only_on_queries() {
        let mut builder = OperationBuilder::query();
        builder.for_resource(notes()).unwrap().with_row_limit(0).unwrap();
        assert_eq!(builder.build().unwrap().row_limit(), Some(0));

        let mut builder = OperationBuilder::delete();
        builder.for_resource(notes()).unwrap().with_row_limit(1).unwrap();
        assert!(matches!(builder.build(), Err(BridgeError::InvalidOperation(_))));
    }

    #[test]
    fn test_descriptor_serializes() {
        let mut builder = OperationBuilder::update();
        builder
            .for_resource(notes().item(3))
            .unwrap()
            .with_values(ValueMap::new().with("tags", "x"))
            .unwrap();
        let descriptor = builder.build().unwrap();
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["kind"], "update");
        assert_eq!(json["locator"], "content://com.ichi2.anki.flashcards/notes/3");
        let back: OperationDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, descriptor);
    }
}
