//! Listing, search and fetch tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lb_directory::{
    CollectingSink, QueryError, ResultSink, Scope, SearchContext, SessionError,
};
use lb_model::EntryRecord;

use crate::common::{TestEnv, BASE_DN};

/// Sink that cancels its context once `limit` entries have arrived.
struct CancelAfter {
    ctx: Arc<SearchContext>,
    limit: usize,
    received: Vec<EntryRecord>,
}

impl ResultSink for CancelAfter {
    fn add_entry(&mut self, entry: EntryRecord) {
        self.received.push(entry);
        if self.received.len() == self.limit {
            self.ctx.cancel();
        }
    }

    fn reset(&mut self) {
        self.received.clear();
    }
}

/// 250 children behind a 100-entry server limit come back complete.
#[tokio::test]
async fn test_list_children_pages_past_size_limit() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    env.directory.set_paging(true);
    env.directory.set_size_limit(Some(100));
    env.populate_children(250);

    let entries = env.engine.list_children("").await?;

    assert_eq!(entries.len(), 250, "all children, not just the first 100");
    assert_eq!(entries[0].label(), "cn=entry000");
    assert_eq!(entries[249].label(), "cn=entry249");
    assert!(entries.windows(2).all(|w| w[0].label() < w[1].label()));
    assert_eq!(entries[0].object_classes, vec!["top", "organizationalrole"]);

    assert_eq!(env.connections.max_page_size().await, Some(99));
    let paged = env.directory.paged_searches();
    assert_eq!(paged.len(), 3, "pages of 99, 99 and 52");
    assert!(paged
        .iter()
        .all(|request| request.page.as_ref().map(|p| p.size) == Some(99)));

    Ok(())
}

/// A learned page size is reused without another direct attempt.
#[tokio::test]
async fn test_learned_page_size_is_reused() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    env.directory.set_paging(true);
    env.directory.set_size_limit(Some(100));
    env.populate_children(150);

    env.engine.list_children("").await?;
    let entries = env.engine.list_children("").await?;
    assert_eq!(entries.len(), 150);

    let direct_listings = env
        .directory
        .searches()
        .iter()
        .filter(|request| request.scope == Scope::OneLevel && request.page.is_none())
        .count();
    assert_eq!(direct_listings, 1, "only the first listing tries unpaged");

    Ok(())
}

/// Without paging support a size-limited result is returned as is.
#[tokio::test]
async fn test_size_limit_without_paging_is_partial() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    env.directory.set_paging(false);
    env.directory.set_size_limit(Some(100));
    env.populate_children(250);

    let entries = env.engine.list_children("").await?;

    assert_eq!(entries.len(), 100);
    assert_eq!(env.connections.max_page_size().await, None);
    assert!(env.directory.paged_searches().is_empty());

    Ok(())
}

/// Batch results are sorted by label regardless of server order.
#[tokio::test]
async fn test_batch_results_sorted_by_label() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    env.directory.add(&format!("ou=zeta,{BASE_DN}"), &["organizationalUnit"]);
    env.directory.add(&format!("ou=Alpha,{BASE_DN}"), &["organizationalUnit"]);
    env.directory.add(&format!("cn=beta,{BASE_DN}"), &["organizationalRole"]);

    let labels: Vec<String> = env
        .engine
        .list_children("")
        .await?
        .iter()
        .map(|entry| entry.label().to_string())
        .collect();

    assert_eq!(labels, vec!["cn=beta", "ou=Alpha", "ou=zeta"]);
    Ok(())
}

/// Streaming keeps server order.
#[tokio::test]
async fn test_streaming_preserves_arrival_order() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    env.populate_children(5);

    let mut sink = CollectingSink::new();
    env.engine
        .search_into("(objectClass=*)", &mut sink, &SearchContext::new())
        .await?;

    let labels: Vec<&str> = sink.entries().iter().map(EntryRecord::label).collect();
    assert_eq!(
        labels,
        vec!["cn=entry004", "cn=entry003", "cn=entry002", "cn=entry001", "cn=entry000"]
    );
    assert_eq!(sink.resets(), 0);
    Ok(())
}

/// Canceling between pages stops delivery without an error and releases
/// the operation's handle.
#[tokio::test]
async fn test_cancel_between_pages() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    env.directory.set_paging(true);
    env.directory.set_size_limit(Some(100));
    env.populate_children(250);
    env.engine.list_children("").await?;
    let pages_before = env.directory.paged_searches().len();
    let closes_before = env.directory.closes();

    let ctx = Arc::new(SearchContext::new());
    let notified = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&notified);
    ctx.on_cancel(move || flag.store(true, Ordering::SeqCst));

    let mut sink = CancelAfter {
        ctx: Arc::clone(&ctx),
        limit: 99,
        received: Vec::new(),
    };
    env.engine.list_children_into("", &mut sink, &ctx).await?;

    assert_eq!(sink.received.len(), 99, "exactly the first page");
    assert_eq!(env.directory.paged_searches().len(), pages_before + 1);
    assert_eq!(env.directory.closes(), closes_before + 1, "operation handle closed");
    assert!(env.connections.is_connected().await);
    assert!(ctx.is_canceled());
    assert!(notified.load(Ordering::SeqCst));
    Ok(())
}

/// Canceling mid-page stops before the next entry.
#[tokio::test]
async fn test_cancel_within_page() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    env.populate_children(20);

    let ctx = Arc::new(SearchContext::new());
    let mut sink = CancelAfter {
        ctx: Arc::clone(&ctx),
        limit: 5,
        received: Vec::new(),
    };
    env.engine.list_children_into("", &mut sink, &ctx).await?;

    assert_eq!(sink.received.len(), 5);
    assert_eq!(env.directory.closes(), 1);
    Ok(())
}

/// Object-class lookups that fail leave entries without classes.
#[tokio::test]
async fn test_object_class_failure_is_ignored() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    env.populate_children(3);
    env.directory.deny_object_class_reads(true);

    let entries = env.engine.list_children("").await?;

    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|entry| entry.object_classes.is_empty()));
    Ok(())
}

/// A non-empty path is listed as an absolute DN.
#[tokio::test]
async fn test_list_children_of_explicit_dn() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    let people = format!("ou=people,{BASE_DN}");
    env.directory.add(&people, &["organizationalUnit"]);
    env.directory.add(&format!("uid=bob,{people}"), &["inetOrgPerson"]);
    env.directory.add(&format!("uid=alice,{people}"), &["inetOrgPerson"]);
    env.directory.add(&format!("ou=groups,{BASE_DN}"), &["organizationalUnit"]);

    let entries = env.engine.list_children(&people).await?;

    let dns: Vec<&str> = entries.iter().map(EntryRecord::dn).collect();
    assert_eq!(
        dns,
        vec![
            "uid=alice,ou=people,dc=example,dc=com",
            "uid=bob,ou=people,dc=example,dc=com"
        ]
    );
    assert!(entries[0].has_object_class("inetOrgPerson"));
    Ok(())
}

/// Subtree search applies the filter below the base DN.
#[tokio::test]
async fn test_search_filters_subtree() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    let people = format!("ou=people,{BASE_DN}");
    env.directory.add(&people, &["organizationalUnit"]);
    for uid in ["jdoe", "asmith"] {
        let mut entry = EntryRecord::new(format!("uid={uid},{people}"));
        entry.add_value("objectClass", "inetOrgPerson");
        entry.add_value("uid", uid);
        env.directory.add_entry(entry);
    }

    let entries = env.engine.search("(uid=jdoe)").await?;

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].dn(), "uid=jdoe,ou=people,dc=example,dc=com");
    assert_eq!(entries[0].object_classes, vec!["inetorgperson"]);
    let request = env
        .directory
        .searches()
        .into_iter()
        .find(|request| request.filter == "(uid=jdoe)")
        .expect("search was sent");
    assert_eq!(request.base, BASE_DN);
    assert_eq!(request.scope, Scope::Subtree);
    assert_eq!(request.attributes, vec!["1.1"]);
    Ok(())
}

/// A single entry is fetched with every user attribute.
#[tokio::test]
async fn test_get_entry_fetches_all_attributes() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;
    let dn = format!("uid=jdoe,ou=people,{BASE_DN}");
    let mut entry = EntryRecord::new(dn.clone());
    entry.add_value("objectClass", "top");
    entry.add_value("objectClass", "inetOrgPerson");
    entry.add_value("cn", "John Doe");
    entry.add_value("mail", "jdoe@example.com");
    env.directory.add_entry(entry);

    let fetched = env.engine.get_entry(&dn).await?;

    assert_eq!(fetched.dn(), dn);
    assert_eq!(fetched.label(), "uid=jdoe");
    assert_eq!(fetched.attributes.first_text("mail"), Some("jdoe@example.com"));
    assert_eq!(fetched.object_classes, vec!["top", "inetorgperson"]);

    let searches = env.directory.searches();
    assert_eq!(searches.len(), 1, "no object-class follow-up for a fetch");
    assert_eq!(searches[0].scope, Scope::Base);
    assert_eq!(searches[0].attributes, vec!["*"]);
    assert_eq!(env.directory.closes(), 1, "the operation handle is closed");
    Ok(())
}

/// A missing entry surfaces the server's result code.
#[tokio::test]
async fn test_get_entry_missing() -> anyhow::Result<()> {
    let env = TestEnv::connected().await?;

    let err = env
        .engine
        .get_entry(&format!("cn=ghost,{BASE_DN}"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        QueryError::Session(SessionError::Result { rc: 32, .. })
    ));
    Ok(())
}
