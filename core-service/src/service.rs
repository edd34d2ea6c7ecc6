//! Typed façade over the dispatch adapter.

use std::fmt;
use std::sync::Arc;

use core_bridge::{
    AffectedRows, ContentRequest, ContentResponse, DispatchAdapter, ErrorKind, Filter,
    InsertedItem, OperationKind, ResourceLocator, ValueMap,
};
use core_runtime::config::BridgeConfig;
use core_runtime::logging::describe_len;
use tracing::{debug, info};

use crate::contract::{self, card, note, DEFAULT_DECK_ID};
use crate::error::{CoreError, Result};

/// Entry point for host applications.
///
/// Cloning shares the same worker pool.
#[derive(Clone)]
pub struct ContentService {
    adapter: Arc<DispatchAdapter>,
}

impl ContentService {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let adapter = DispatchAdapter::new(config)?;
        info!(
            authority = adapter.authority(),
            workers = adapter.workers(),
            "Content service ready"
        );
        Ok(Self {
            adapter: Arc::new(adapter),
        })
    }

    pub fn adapter(&self) -> &DispatchAdapter {
        &self.adapter
    }

    pub fn authority(&self) -> &str {
        self.adapter.authority()
    }

    /// Runs a request as-is.
    pub async fn execute(&self, request: ContentRequest) -> Result<ContentResponse> {
        Ok(self.adapter.call(request).await?)
    }

    pub async fn insert(&self, target: &str, values: ValueMap) -> Result<InsertedItem> {
        match self.execute(ContentRequest::insert(target, values)).await? {
            ContentResponse::Inserted { id, locator } => Ok(InsertedItem {
                id,
                locator: ResourceLocator::parse(&locator)?,
            }),
            other => Err(unexpected(OperationKind::Insert, &other)),
        }
    }

    /// Runs a query request and returns every row.
    pub async fn query(&self, request: ContentRequest) -> Result<Vec<ValueMap>> {
        if request.kind != OperationKind::Query {
            return Err(CoreError::InvalidInput(format!(
                "query called with a {} request",
                request.kind
            )));
        }
        match self.execute(request).await? {
            ContentResponse::Rows { rows } => Ok(rows),
            other => Err(unexpected(OperationKind::Query, &other)),
        }
    }

    pub async fn update(
        &self,
        target: &str,
        values: ValueMap,
        filter: Option<Filter>,
    ) -> Result<AffectedRows> {
        let mut request = ContentRequest::update(target, values);
        request.filter = filter;
        self.affected(OperationKind::Update, request).await
    }

    pub async fn delete(&self, target: &str, filter: Option<Filter>) -> Result<AffectedRows> {
        let mut request = ContentRequest::delete(target);
        request.filter = filter;
        self.affected(OperationKind::Delete, request).await
    }

    pub async fn bulk_insert(&self, target: &str, rows: Vec<ValueMap>) -> Result<usize> {
        match self.execute(ContentRequest::bulk_insert(target, rows)).await? {
            ContentResponse::BulkInserted { count } => Ok(count),
            other => Err(unexpected(OperationKind::BulkInsert, &other)),
        }
    }

    /// Whether the provider answers at all. Permission failures still
    /// surface as errors.
    pub async fn is_available(&self) -> Result<bool> {
        let root = ResourceLocator::root(self.authority())?;
        let probe = ContentRequest::query(root.to_string()).row_limit(0);
        match self.adapter.call(probe).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::ResourceUnavailable => {
                debug!(error = %err, "Provider unavailable");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Adds a note and moves its cards to `deck_id` when that is not the
    /// default deck. Returns the note id.
    pub async fn add_note<S: AsRef<str>>(
        &self,
        model_id: i64,
        deck_id: i64,
        fields: &[S],
        tags: &[S],
    ) -> Result<i64> {
        if fields.is_empty() {
            return Err(CoreError::InvalidInput("a note needs at least one field".to_string()));
        }
        let flds = contract::join_fields(fields);
        debug!(model_id, deck_id, flds = %describe_len(&flds), "Adding note");

        let values = ValueMap::new()
            .with(note::MID, model_id)
            .with(note::FLDS, flds)
            .with(note::TAGS, contract::join_tags(tags));
        let item = self.insert(&contract::notes(), values).await?;

        if deck_id != DEFAULT_DECK_ID {
            let moved = self
                .update(
                    &contract::cards(item.id),
                    ValueMap::new().with(card::DECK_ID, deck_id),
                    None,
                )
                .await?;
            debug!(note_id = item.id, cards = moved.count(), deck_id, "Moved cards");
        }
        Ok(item.id)
    }

    async fn affected(&self, kind: OperationKind, request: ContentRequest) -> Result<AffectedRows> {
        match self.execute(request).await? {
            ContentResponse::Affected { count } => Ok(AffectedRows(count)),
            other => Err(unexpected(kind, &other)),
        }
    }
}

impl fmt::Debug for ContentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentService")
            .field("adapter", &self.adapter)
            .finish()
    }
}

fn unexpected(kind: OperationKind, response: &ContentResponse) -> CoreError {
    CoreError::UnexpectedResponse {
        operation: kind.to_string(),
        response: format!("{response:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::{Fault, HostOp, MemoryHost};

    fn service(host: &Arc<MemoryHost>) -> ContentService {
        let config = BridgeConfig::builder()
            .host_runtime(host.clone())
            .worker_threads(2)
            .build()
            .unwrap();
        ContentService::new(&config).unwrap()
    }

    fn host() -> Arc<MemoryHost> {
        Arc::new(
            MemoryHost::builder()
                .provider(contract::AUTHORITY)
                .collection(contract::AUTHORITY, "notes", &["mid", "flds", "tags"])
                .build(),
        )
    }

    #[core_async::test]
    async fn test_insert_and_query_back() {
        let host = host();
        let service = service(&host);
        let item = service
            .insert(
                &contract::notes(),
                ValueMap::new().with(note::FLDS, "Q\u{1f}A").with(note::TAGS, "x"),
            )
            .await
            .unwrap();
        assert!(item.id > 0);
        assert_eq!(item.locator, contract::locator(&contract::note(item.id)).unwrap());

        let rows = service
            .query(ContentRequest::query(contract::notes()).projection([note::ID, note::FLDS]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64(note::ID).unwrap(), Some(item.id));
        assert_eq!(
            contract::split_fields(rows[0].get_text(note::FLDS).unwrap().unwrap()),
            ["Q", "A"]
        );
    }

    #[core_async::test]
    async fn test_query_rejects_other_kinds() {
        let service = service(&host());
        let err = service
            .query(ContentRequest::delete(contract::notes()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[core_async::test]
    async fn test_add_note_moves_cards_off_default_deck() {
        let host = host();
        let service = service(&host);

        let id = service.add_note(7, DEFAULT_DECK_ID, &["Q", "A"], &["tag"]).await.unwrap();
        assert!(id > 0);
        assert_eq!(host.stats().attaches, 1);

        service.add_note(7, 2, &["Q2", "A2"], &[]).await.unwrap();
        assert_eq!(host.stats().attaches, 3);
        assert_eq!(host.row_count(contract::AUTHORITY, "notes"), 2);

        let err = service.add_note::<&str>(7, 1, &[], &[]).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[core_async::test]
    async fn test_update_and_delete_report_counts() {
        let host = host();
        let service = service(&host);
        let id = service.add_note(1, DEFAULT_DECK_ID, &["Q", "A"], &[]).await.unwrap();

        let updated = service
            .update(&contract::note(id), ValueMap::new().with(note::TAGS, "done"), None)
            .await
            .unwrap();
        assert_eq!(updated.count(), 1);

        let missing = service
            .delete(
                &contract::notes(),
                Some(Filter::new("tags = ?").with_args(["nothing"])),
            )
            .await
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(
            missing.require_any("notes tagged nothing").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let deleted = service.delete(&contract::note(id), None).await.unwrap();
        assert_eq!(deleted.count(), 1);
    }

    #[core_async::test]
    async fn test_bulk_insert() {
        let host = host();
        let service = service(&host);
        let rows = vec![
            ValueMap::new().with(note::FLDS, "a"),
            ValueMap::new().with(note::FLDS, "b"),
        ];
        assert_eq!(service.bulk_insert(&contract::notes(), rows).await.unwrap(), 2);
    }

    #[core_async::test]
    async fn test_is_available() {
        let host = host();
        let service = service(&host);
        service.add_note(1, DEFAULT_DECK_ID, &["Q", "A"], &[]).await.unwrap();
        let before = host.stats();
        assert!(service.is_available().await.unwrap());

        // Root uri and cursor only: no row is read.
        let after = host.stats();
        assert_eq!(after.refs_created - before.refs_created, 2);
        assert_eq!(after.cursors_closed - before.cursors_closed, 1);

        let elsewhere = ContentService::new(
            &BridgeConfig::builder()
                .host_runtime(host.clone())
                .authority("com.example.missing")
                .build()
                .unwrap(),
        )
        .unwrap();
        assert!(!elsewhere.is_available().await.unwrap());

        host.inject_once(
            HostOp::Query,
            Fault::throw("java.lang.SecurityException", "Permission Denial"),
        );
        let err = service.is_available().await.unwrap_err();
        assert_eq!(err.bridge_kind(), Some(ErrorKind::PermissionDenied));
        assert_eq!(err.context().kind, ErrorKind::PermissionDenied);
    }
}
