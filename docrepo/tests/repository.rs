use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docrepo::{
    backend::{StoreBackend, WriteOutcome},
    constraint::{ExpressionInScope, QueryableHandlerExpression},
    error::{DocumentStoreError, DocumentStoreResult},
    expression::SparseFieldTableExpression,
    memory::InMemoryStore,
    prelude::*,
    query::{Expr, Filter, Query},
    session::SessionHandle,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum Format {
    #[default]
    Paperback,
    Hardcover,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Resource)]
#[serde(default)]
#[resource(name = "books")]
struct Book {
    #[resource(id)]
    id: String,
    #[resource(attr)]
    caption: String,
    #[resource(attr)]
    in_print: bool,
    #[resource(attr)]
    pages: i64,
    #[resource(attr)]
    rating: f64,
    #[resource(attr)]
    published: Option<DateTime<Utc>>,
    #[resource(attr, kind = "enum")]
    format: Format,
    #[resource(has_one = "people")]
    author: Option<String>,
    #[resource(has_many = "reviews")]
    reviews: Vec<String>,
}

/// Forwards to an in-memory store, counting every call that reaches it.
#[derive(Debug, Default)]
struct CountingBackend {
    inner: InMemoryStore,
    calls: AtomicUsize,
    unacknowledged: AtomicBool,
}

impl CountingBackend {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn called(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn outcome(&self, outcome: WriteOutcome) -> WriteOutcome {
        match self.unacknowledged.load(Ordering::SeqCst) {
            true => WriteOutcome::unacknowledged(),
            false => outcome,
        }
    }
}

#[async_trait]
impl StoreBackend for CountingBackend {
    async fn start_session(&self) -> DocumentStoreResult<Box<dyn SessionHandle>> {
        self.called();
        self.inner.start_session().await
    }

    async fn insert_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        self.called();
        let outcome = self
            .inner
            .insert_document(session, collection, document)
            .await?;
        Ok(self.outcome(outcome))
    }

    async fn replace_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
        document: Document,
    ) -> DocumentStoreResult<WriteOutcome> {
        self.called();
        let outcome = self
            .inner
            .replace_document(session, collection, id, document)
            .await?;
        Ok(self.outcome(outcome))
    }

    async fn delete_document(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        id: &str,
    ) -> DocumentStoreResult<WriteOutcome> {
        self.called();
        let outcome = self
            .inner
            .delete_document(session, collection, id)
            .await?;
        Ok(self.outcome(outcome))
    }

    async fn query_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        query: Query,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.called();
        self.inner
            .query_documents(session, collection, query)
            .await
    }

    async fn count_documents(
        &self,
        session: Option<&mut (dyn SessionHandle + 'static)>,
        collection: &str,
        filter: Option<Expr>,
    ) -> DocumentStoreResult<u64> {
        self.called();
        self.inner
            .count_documents(session, collection, filter)
            .await
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.called();
        self.inner.create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.called();
        self.inner.drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.called();
        self.inner.list_collections().await
    }
}

fn book(id: &str, caption: &str, pages: i64) -> Book {
    Book {
        id: id.into(),
        caption: caption.into(),
        pages,
        ..Default::default()
    }
}

fn attribute(books: &DocumentRepository<'_, impl StoreBackend, Book>, name: &str) -> AttrAttribute {
    books
        .resource_type()
        .attribute(name)
        .cloned()
        .unwrap_or_else(|| panic!("books have a '{name}' attribute"))
}

fn relationship(books: &DocumentRepository<'_, impl StoreBackend, Book>, name: &str) -> RelationshipAttribute {
    books
        .resource_type()
        .relationship(name)
        .cloned()
        .unwrap_or_else(|| panic!("books have a '{name}' relationship"))
}

async fn create<B: StoreBackend>(
    books: &DocumentRepository<'_, B, Book>,
    session: &mut SessionHolder,
    request: &Book,
) -> RepositoryResult<Book> {
    let cancel = CancellationToken::new();
    let targeted = TargetedFields::all_attributes(books.resource_type());
    let mut target = books
        .prepare_for_create(&request.id, &cancel)
        .await?;

    books
        .create(session, &targeted, request, &mut target, &cancel)
        .await?;
    Ok(target)
}

async fn by_id<B: StoreBackend>(books: &DocumentRepository<'_, B, Book>, id: &str) -> Vec<Book> {
    let layer = QueryLayer::new(books.resource_type().clone())
        .with_filter(QueryExpression::equals(FieldChain::single(attribute(books, "id")), id));

    books
        .get(&mut SessionHolder::new(), &layer, &CancellationToken::new())
        .await
        .expect("readable")
}

#[tokio::test]
async fn include_fails_before_the_store_is_called() {
    let backend = CountingBackend::default();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");

    let layer = QueryLayer::new(books.resource_type().clone())
        .with_include(FieldChain::single(relationship(&books, "author")));

    let err = books
        .get(&mut SessionHolder::new(), &layer, &CancellationToken::new())
        .await
        .expect_err("includes are unsupported");

    assert!(matches!(err, RepositoryError::UnsupportedRelationship(_)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn filter_on_caption_returns_the_matching_document() {
    let backend = CountingBackend::default();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    create(&books, &mut session, &book("b1", "One", 100)).await.expect("created");
    create(&books, &mut session, &book("b2", "Two", 200)).await.expect("created");

    let layer = QueryLayer::new(books.resource_type().clone())
        .with_filter(QueryExpression::equals(FieldChain::single(attribute(&books, "caption")), "Two"));
    let found = books
        .get(&mut session, &layer, &CancellationToken::new())
        .await
        .expect("readable");

    assert_eq!(found, vec![book("b2", "Two", 200)]);
}

#[tokio::test]
async fn created_attributes_read_back_unchanged() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");

    let request = Book {
        id: "b1".into(),
        caption: "Ünïcode & more".into(),
        in_print: true,
        pages: i64::MAX,
        rating: 4.25,
        published: DateTime::from_timestamp(1_600_000_000, 123_456_789),
        format: Format::Hardcover,
        author: Some("p1".into()),
        reviews: vec!["r1".into()],
    };

    let created = create(&books, &mut SessionHolder::new(), &request)
        .await
        .expect("created");
    let found = by_id(&books, "b1").await;

    let expected = Book { author: None, reviews: Vec::new(), ..request };
    assert_eq!(created, expected);
    assert_eq!(found, vec![expected]);
}

#[tokio::test]
async fn deleting_a_missing_document_fails() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");

    let err = books
        .delete(&mut SessionHolder::new(), None, "missing", &CancellationToken::new())
        .await
        .expect_err("nothing to delete");

    let RepositoryError::DataStoreUpdate(inner) = err else {
        panic!("expected a data store update error, got {err:?}");
    };
    assert!(inner.message().contains("does not exist"));
}

#[tokio::test]
async fn deleting_removes_exactly_one_document() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    create(&books, &mut session, &book("b1", "One", 1)).await.expect("created");
    create(&books, &mut session, &book("b2", "Two", 2)).await.expect("created");

    books
        .delete(&mut session, None, "b1", &CancellationToken::new())
        .await
        .expect("deleted");

    assert!(by_id(&books, "b1").await.is_empty());
    assert_eq!(
        books
            .count(&mut session, None, &CancellationToken::new())
            .await
            .expect("countable"),
        1
    );
}

#[tokio::test]
async fn unacknowledged_delete_fails() {
    let backend = CountingBackend::default();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    create(&books, &mut session, &book("b1", "One", 1)).await.expect("created");
    backend.unacknowledged.store(true, Ordering::SeqCst);

    let err = books
        .delete(&mut session, None, "b1", &CancellationToken::new())
        .await
        .expect_err("not acknowledged");

    let RepositoryError::DataStoreUpdate(inner) = err else {
        panic!("expected a data store update error, got {err:?}");
    };
    assert!(inner.message().contains("not acknowledged"));
}

#[tokio::test]
async fn failed_write_aborts_the_transaction() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    let transaction_id = store
        .begin_transaction(&mut session)
        .await
        .expect("transaction started");
    assert_eq!(session.transaction_id(), Some(transaction_id));

    create(&books, &mut session, &book("b1", "One", 1)).await.expect("created");
    let err = create(&books, &mut session, &book("b1", "Again", 2))
        .await
        .expect_err("duplicate identity");

    let RepositoryError::DataStoreUpdate(inner) = err else {
        panic!("expected a data store update error, got {err:?}");
    };
    assert!(matches!(
        inner.cause(),
        Some(DocumentStoreError::DocumentAlreadyExists(..))
    ));
    assert!(!session.is_in_transaction());
    assert_eq!(session.transaction_id(), None);

    // The aborted transaction's first insert never became visible.
    assert!(by_id(&books, "b1").await.is_empty());
}

#[tokio::test]
async fn repositories_share_the_holder_transaction() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let first = store.repository::<Book>().expect("string identity");
    let second = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    store
        .begin_transaction(&mut session)
        .await
        .expect("transaction started");
    let before = session.transaction_id();

    create(&first, &mut session, &book("b1", "One", 1)).await.expect("created");
    create(&second, &mut session, &book("b2", "Two", 2)).await.expect("created");
    assert_eq!(session.transaction_id(), before);
    assert!(by_id(&first, "b1").await.is_empty());

    session.commit().await.expect("committed");

    assert_eq!(by_id(&first, "b1").await.len(), 1);
    assert_eq!(by_id(&second, "b2").await.len(), 1);
}

#[tokio::test]
async fn update_copies_only_targeted_attributes() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let cancel = CancellationToken::new();
    let mut session = SessionHolder::new();

    create(&books, &mut session, &book("b1", "One", 100)).await.expect("created");

    let layer = QueryLayer::new(books.resource_type().clone())
        .with_filter(QueryExpression::equals(FieldChain::single(attribute(&books, "id")), "b1"));
    let mut target = books
        .prepare_for_update(&mut session, &layer, &cancel)
        .await
        .expect("readable")
        .expect("stored");

    let request = Book { caption: "One, revised".into(), pages: 999, ..Default::default() };
    let targeted = TargetedFields::new().with_attribute(attribute(&books, "caption"));
    books
        .update(&mut session, &targeted, &request, &mut target, &cancel)
        .await
        .expect("updated");

    assert_eq!(by_id(&books, "b1").await, vec![book("b1", "One, revised", 100)]);
}

#[tokio::test]
async fn sort_and_pagination_select_a_page() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    for (id, pages) in [("b1", 30), ("b2", 10), ("b3", 50), ("b4", 20), ("b5", 40)] {
        create(&books, &mut session, &book(id, id, pages)).await.expect("created");
    }

    let layer = QueryLayer::new(books.resource_type().clone())
        .with_sort(SortExpression::new([SortElement::descending(FieldChain::single(
            attribute(&books, "pages"),
        ))]))
        .with_pagination(PaginationExpression::new(2, Some(2)));
    let page = books
        .get(&mut session, &layer, &CancellationToken::new())
        .await
        .expect("readable");

    let ids = page.iter().map(|book| book.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, ["b1", "b4"]);
}

#[tokio::test]
async fn comparing_two_attributes_is_rejected() {
    let backend = CountingBackend::default();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");

    let layer = QueryLayer::new(books.resource_type().clone()).with_filter(QueryExpression::compare(
        ComparisonOperator::GreaterThan,
        QueryExpression::field(FieldChain::single(attribute(&books, "pages"))),
        QueryExpression::field(FieldChain::single(attribute(&books, "rating"))),
    ));

    let err = books
        .get(&mut SessionHolder::new(), &layer, &CancellationToken::new())
        .await
        .expect_err("attribute comparison");

    assert!(matches!(err, RepositoryError::AttributeComparisonNotSupported(_)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn projected_relationship_from_a_constraint_is_rejected() {
    let backend = CountingBackend::default();
    let store = DocumentStore::new(&backend);
    let author = ResourceField::Relationship(
        store
            .repository::<Book>()
            .map(|books| relationship(&books, "author"))
            .expect("string identity"),
    );

    let table = SparseFieldTableExpression {
        table: [("books".to_string(), SparseFieldSet::new([author]))].into(),
    };
    let books = store
        .repository::<Book>()
        .expect("string identity")
        .with_constraint_provider(Arc::new(vec![ExpressionInScope::unscoped(
            QueryExpression::SparseFieldTable(table),
        )]));

    let layer = QueryLayer::new(books.resource_type().clone());
    let err = books
        .get(&mut SessionHolder::new(), &layer, &CancellationToken::new())
        .await
        .expect_err("relationship projected");

    assert!(matches!(err, RepositoryError::UnsupportedRelationship(_)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn queryable_handlers_narrow_the_query() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    create(&books, &mut session, &Book { in_print: true, ..book("b1", "One", 1) })
        .await
        .expect("created");
    create(&books, &mut session, &book("b2", "Two", 2)).await.expect("created");

    let in_print_only = QueryableHandlerExpression::new(|query: Query| {
        query.and_filter(Filter::eq("in_print", true))
    });
    let books = books.with_constraint_provider(Arc::new(vec![ExpressionInScope::unscoped(
        QueryExpression::QueryableHandler(in_print_only),
    )]));

    let layer = QueryLayer::new(books.resource_type().clone());
    let found = books
        .get(&mut session, &layer, &CancellationToken::new())
        .await
        .expect("readable");

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "b1");
}

#[tokio::test]
async fn sparse_fieldsets_leave_other_attributes_at_their_defaults() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    create(&books, &mut session, &Book { in_print: true, ..book("b1", "One", 100) })
        .await
        .expect("created");

    let caption = ResourceField::Attribute(attribute(&books, "caption"));
    let layer = QueryLayer::new(books.resource_type().clone())
        .with_projection("books", SparseFieldSet::new([caption]));
    let found = books
        .get(&mut session, &layer, &CancellationToken::new())
        .await
        .expect("readable");

    assert_eq!(found, vec![Book { id: "b1".into(), caption: "One".into(), ..Default::default() }]);
}

#[tokio::test]
async fn relationship_writes_fail() {
    let backend = CountingBackend::default();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let cancel = CancellationToken::new();
    let reviews = relationship(&books, "reviews");
    let mut left = book("b1", "One", 1);
    let right = vec!["r1".to_string()];

    assert!(matches!(
        books.set_relationship(&mut left, &reviews, &right, &cancel).await,
        Err(RepositoryError::UnsupportedRelationship(_))
    ));
    assert!(matches!(
        books.add_to_to_many_relationship("b1", &reviews, &right, &cancel).await,
        Err(RepositoryError::UnsupportedRelationship(_))
    ));
    assert!(matches!(
        books.remove_from_to_many_relationship(&mut left, &reviews, &right, &cancel).await,
        Err(RepositoryError::UnsupportedRelationship(_))
    ));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn cancelled_reads_do_not_reach_the_store() {
    let backend = CountingBackend::default();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let layer = QueryLayer::new(books.resource_type().clone());
    let err = books
        .get(&mut SessionHolder::new(), &layer, &cancel)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, RepositoryError::Cancelled));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn count_applies_the_filter() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    for (id, pages) in [("b1", 30), ("b2", 10), ("b3", 50)] {
        create(&books, &mut session, &book(id, id, pages)).await.expect("created");
    }

    let filter = QueryExpression::compare(
        ComparisonOperator::GreaterOrEqual,
        QueryExpression::field(FieldChain::single(attribute(&books, "pages"))),
        QueryExpression::literal(Bson::Int64(30)),
    );
    let count = books
        .count(&mut session, Some(&filter), &CancellationToken::new())
        .await
        .expect("countable");

    assert_eq!(count, 2);
}

/// Upper-cases captions before they are written and rejects deletes of "locked" books.
#[derive(Debug, Default)]
struct CaptionHooks {
    succeeded: AtomicUsize,
}

#[async_trait]
impl ResourceWriteHooks<Book> for CaptionHooks {
    async fn on_writing(
        &self,
        resource: &mut Book,
        kind: WriteOperationKind,
        _cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        match kind {
            WriteOperationKind::DeleteResource if resource.id == "locked" => {
                Err(RepositoryError::InvalidConfiguration("locked books cannot be deleted".into()))
            }
            _ => {
                resource.caption = resource.caption.to_uppercase();
                Ok(())
            }
        }
    }

    async fn on_write_succeeded(
        &self,
        _resource: &Book,
        _kind: WriteOperationKind,
        _cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn write_hooks_run_around_the_store_call() {
    let backend = CountingBackend::default();
    let store = DocumentStore::new(&backend);
    let hooks = Arc::new(CaptionHooks::default());
    let books = store
        .repository::<Book>()
        .expect("string identity")
        .with_write_hooks(hooks.clone());
    let mut session = SessionHolder::new();

    create(&books, &mut session, &book("b1", "one", 1)).await.expect("created");
    assert_eq!(by_id(&books, "b1").await, vec![book("b1", "ONE", 1)]);
    assert_eq!(hooks.succeeded.load(Ordering::SeqCst), 1);

    let calls = backend.calls();
    let err = books
        .delete(&mut session, None, "locked", &CancellationToken::new())
        .await
        .expect_err("rejected by hook");

    assert!(matches!(err, RepositoryError::InvalidConfiguration(_)));
    assert_eq!(backend.calls(), calls);
    assert_eq!(hooks.succeeded.load(Ordering::SeqCst), 1);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Resource)]
#[resource(name = "notes")]
struct Note {
    #[resource(id)]
    id: String,
    #[resource(attr)]
    caption: String,
    #[resource(attr)]
    pages: i64,
}

#[tokio::test]
async fn sparse_fieldsets_work_without_serde_defaults() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let notes = store.repository::<Note>().expect("string identity");
    let cancel = CancellationToken::new();
    let mut session = SessionHolder::new();

    let request = Note { id: "n1".into(), caption: "One".into(), pages: 12 };
    let mut target = notes
        .prepare_for_create("n1", &cancel)
        .await
        .expect("prepared");
    notes
        .create(
            &mut session,
            &TargetedFields::all_attributes(notes.resource_type()),
            &request,
            &mut target,
            &cancel,
        )
        .await
        .expect("created");

    let caption = notes
        .resource_type()
        .attribute("caption")
        .cloned()
        .expect("notes have a caption");
    let layer = QueryLayer::new(notes.resource_type().clone())
        .with_projection("notes", SparseFieldSet::new([ResourceField::Attribute(caption)]));
    let found = notes
        .get(&mut session, &layer, &cancel)
        .await
        .expect("readable");

    assert_eq!(found, vec![Note { id: "n1".into(), caption: "One".into(), pages: 0 }]);
}

#[tokio::test]
async fn zero_page_size_returns_no_documents() {
    let backend = InMemoryStore::new();
    let store = DocumentStore::new(&backend);
    let books = store.repository::<Book>().expect("string identity");
    let mut session = SessionHolder::new();

    create(&books, &mut session, &book("b1", "One", 1)).await.expect("created");

    let layer = QueryLayer::new(books.resource_type().clone())
        .with_pagination(PaginationExpression::new(1, Some(0)));
    let page = books
        .get(&mut session, &layer, &CancellationToken::new())
        .await
        .expect("readable");

    assert!(page.is_empty());
}
