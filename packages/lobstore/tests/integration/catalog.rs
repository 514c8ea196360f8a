use futures::TryStreamExt;
use lobstore::{FsObject, FsObjectCatalog, LargeObject, OpenMode, StorageError};
use sea_orm::{ConnectionTrait, TransactionTrait};

use crate::common::TestDb;

/// Unlink the object behind `record` in its own transaction, leaving the row.
async fn unlink_behind(t: &TestDb, record: &FsObject) {
    let txn = t.db.begin().await.unwrap();
    let mut lo = LargeObject::open(&txn, record.oid(), OpenMode::READ)
        .await
        .unwrap();
    lo.unlink().await.unwrap();
    drop(lo);
    txn.commit().await.unwrap();
}

async fn insert_with_content(t: &TestDb, digest: &str, content: &[u8]) -> FsObject {
    let txn = t.db.begin().await.unwrap();
    let mut record = FsObjectCatalog::new(&txn)
        .insert(digest, None)
        .await
        .unwrap();
    record
        .with_lobject(&txn, "wb", async |lo| lo.write_all(content).await)
        .await
        .unwrap();
    txn.commit().await.unwrap();
    record
}

mod scoped_access {
    use super::*;

    #[tokio::test]
    async fn write_read_delete_scenario() {
        let t = TestDb::spawn().await;

        let txn = t.db.begin().await.unwrap();
        let catalog = FsObjectCatalog::new(&txn);
        let mut record = catalog.insert("abc", Some("greeting".into())).await.unwrap();
        assert_eq!(record.oid(), None);

        let written = record
            .with_lobject(&txn, "wb", async |lo| lo.write(b"hello").await)
            .await
            .unwrap();
        assert_eq!(written, 5);
        assert_ne!(record.object_id, 0);

        // The allocation is visible to catalog reads in the same transaction.
        let reread = catalog.get_by_digest("abc").await.unwrap().unwrap();
        assert_eq!(reread.object_id, record.object_id);
        txn.commit().await.unwrap();

        let txn = t.db.begin().await.unwrap();
        let catalog = FsObjectCatalog::new(&txn);
        let mut record = catalog.get_by_digest("abc").await.unwrap().unwrap();
        let oid = record.object_id;
        let data = record
            .with_lobject(&txn, OpenMode::default(), async |lo| lo.read(5).await)
            .await
            .unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(record.object_id, oid);
        assert!(record.check_lobject(&txn).await.unwrap());

        record.delete(&txn).await.unwrap();
        assert_eq!(catalog.get_by_digest("abc").await.unwrap(), None);
        assert!(!record.check_lobject(&txn).await.unwrap());
        txn.commit().await.unwrap();

        assert_eq!(t.large_object_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_mode_leaves_record_untouched() {
        let t = TestDb::spawn().await;
        let txn = t.db.begin().await.unwrap();
        let mut record = FsObjectCatalog::new(&txn)
            .insert("abc", None)
            .await
            .unwrap();

        let err = record
            .with_lobject(&txn, "w", async |_lo| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidMode { .. }));
        assert_eq!(record.object_id, 0);
        txn.commit().await.unwrap();

        assert_eq!(t.large_object_count().await, 0);
    }

    #[tokio::test]
    async fn close_after_transaction_failure_is_swallowed() {
        let t = TestDb::spawn().await;
        let mut record = insert_with_content(&t, "abc", b"hello").await;

        let txn = t.db.begin().await.unwrap();
        let result = record
            .with_lobject(&txn, OpenMode::READ, async |_lo| {
                let failed = txn.execute_unprepared("SELECT * FROM no_such_table").await;
                assert!(failed.is_err());
                Ok(())
            })
            .await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn uncatalogued_record_gets_no_object() {
        let t = TestDb::spawn().await;

        let txn = t.db.begin().await.unwrap();
        let mut record = FsObject::new("never-inserted", None);
        let err = record
            .with_lobject(&txn, "wb", async |lo| lo.write_all(b"lost").await)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert_eq!(record.object_id, 0);
        txn.commit().await.unwrap();

        assert_eq!(t.large_object_count().await, 0);
    }

    #[tokio::test]
    async fn rollback_undoes_allocation_and_record() {
        let t = TestDb::spawn().await;

        let txn = t.db.begin().await.unwrap();
        let mut record = FsObjectCatalog::new(&txn)
            .insert("abc", None)
            .await
            .unwrap();
        record
            .with_lobject(&txn, OpenMode::READ_WRITE, async |lo| {
                lo.write_all(b"tmp").await
            })
            .await
            .unwrap();
        txn.rollback().await.unwrap();

        assert_eq!(FsObjectCatalog::new(&t.db).get_by_digest("abc").await.unwrap(), None);
        assert_eq!(t.large_object_count().await, 0);
    }
}

mod integrity {
    use super::*;

    #[tokio::test]
    async fn unallocated_record_is_not_intact() {
        let t = TestDb::spawn().await;
        let record = FsObjectCatalog::new(&t.db)
            .insert("abc", None)
            .await
            .unwrap();
        assert!(!record.check_lobject(&t.db).await.unwrap());
    }

    #[tokio::test]
    async fn live_object_is_intact() {
        let t = TestDb::spawn().await;
        let record = insert_with_content(&t, "abc", b"hello").await;
        assert!(record.check_lobject(&t.db).await.unwrap());
    }

    #[tokio::test]
    async fn unlinked_object_is_detected_without_breaking_transaction() {
        let t = TestDb::spawn().await;
        let record = insert_with_content(&t, "abc", b"hello").await;

        let txn = t.db.begin().await.unwrap();
        let mut lo = LargeObject::open(&txn, record.oid(), OpenMode::READ)
            .await
            .unwrap();
        lo.unlink().await.unwrap();
        drop(lo);

        assert!(!record.check_lobject(&txn).await.unwrap());

        // The failed probe was confined to a savepoint.
        let still_there = FsObjectCatalog::new(&txn).get_by_digest("abc").await.unwrap();
        assert_eq!(still_there, Some(record));
        txn.commit().await.unwrap();
    }
}

mod enumeration {
    use super::*;

    #[tokio::test]
    async fn get_by_digest_distinguishes_records() {
        let t = TestDb::spawn().await;
        let catalog = FsObjectCatalog::new(&t.db);
        catalog.insert("a", Some("first".into())).await.unwrap();
        catalog.insert("b", None).await.unwrap();

        assert_eq!(catalog.get_by_digest("never").await.unwrap(), None);
        let a = catalog.get_by_digest("a").await.unwrap().unwrap();
        assert_eq!(a.digest, "a");
        assert_eq!(a.description.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn duplicate_digest_is_rejected() {
        let t = TestDb::spawn().await;
        let catalog = FsObjectCatalog::new(&t.db);
        catalog.insert("a", None).await.unwrap();

        let err = catalog.insert("a", None).await.unwrap_err();
        assert!(matches!(err, StorageError::Database(_)));
    }

    #[tokio::test]
    async fn scan_is_restartable() {
        let t = TestDb::spawn().await;
        let catalog = FsObjectCatalog::new(&t.db);
        for digest in ["c", "a", "b"] {
            catalog.insert(digest, None).await.unwrap();
        }

        let scan = catalog.get_all().await.unwrap();
        assert!(scan.is_provisioned());

        let fetched: Vec<String> = scan
            .fetch(&t.db)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.digest)
            .collect();
        assert_eq!(fetched, ["a", "b", "c"]);

        let streamed: Vec<FsObject> = scan
            .stream(&t.db)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(streamed.len(), 3);
    }

    #[tokio::test]
    async fn missing_table_reads_as_empty() {
        let t = TestDb::spawn_unprovisioned().await;
        let catalog = FsObjectCatalog::new(&t.db);

        let scan = catalog.get_all().await.unwrap();
        assert!(!scan.is_provisioned());
        assert!(scan.fetch(&t.db).await.unwrap().is_empty());

        let streamed: Vec<FsObject> = scan
            .stream(&t.db)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(streamed.is_empty());

        assert_eq!(catalog.delete_all().await.unwrap(), 0);
    }
}

mod purge {
    use super::*;

    #[tokio::test]
    async fn delete_all_on_empty_catalog() {
        let t = TestDb::spawn().await;
        let txn = t.db.begin().await.unwrap();
        assert_eq!(FsObjectCatalog::new(&txn).delete_all().await.unwrap(), 0);
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn delete_all_removes_records_and_objects() {
        let t = TestDb::spawn().await;
        insert_with_content(&t, "a", b"one").await;
        insert_with_content(&t, "b", b"two").await;
        FsObjectCatalog::new(&t.db).insert("c", None).await.unwrap();

        let txn = t.db.begin().await.unwrap();
        let catalog = FsObjectCatalog::new(&txn);
        assert_eq!(catalog.delete_all().await.unwrap(), 3);
        assert!(catalog.get_all().await.unwrap().fetch(&txn).await.unwrap().is_empty());
        txn.commit().await.unwrap();

        assert_eq!(t.large_object_count().await, 0);
    }

    #[tokio::test]
    async fn record_with_vanished_object_can_be_deleted() {
        let t = TestDb::spawn().await;
        let mut record = insert_with_content(&t, "abc", b"hello").await;
        unlink_behind(&t, &record).await;

        let txn = t.db.begin().await.unwrap();
        record.delete(&txn).await.unwrap();
        assert_eq!(record.oid(), None);
        assert_eq!(FsObjectCatalog::new(&txn).get_by_digest("abc").await.unwrap(), None);
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn delete_all_removes_records_with_vanished_objects() {
        let t = TestDb::spawn().await;
        insert_with_content(&t, "a", b"one").await;
        let broken = insert_with_content(&t, "b", b"two").await;
        insert_with_content(&t, "c", b"three").await;
        unlink_behind(&t, &broken).await;

        let txn = t.db.begin().await.unwrap();
        let catalog = FsObjectCatalog::new(&txn);
        assert_eq!(catalog.delete_all().await.unwrap(), 3);
        assert!(catalog.get_all().await.unwrap().fetch(&txn).await.unwrap().is_empty());
        txn.commit().await.unwrap();

        assert_eq!(t.large_object_count().await, 0);
    }

    #[tokio::test]
    async fn orphaned_objects_survive_delete_all() {
        let t = TestDb::spawn().await;
        insert_with_content(&t, "a", b"one").await;

        let txn = t.db.begin().await.unwrap();
        let mut orphan = LargeObject::open(&txn, None, OpenMode::READ_WRITE)
            .await
            .unwrap();
        orphan.write_all(b"nobody knows").await.unwrap();
        orphan.close().await.unwrap();
        drop(orphan);
        txn.commit().await.unwrap();

        let txn = t.db.begin().await.unwrap();
        assert_eq!(FsObjectCatalog::new(&txn).delete_all().await.unwrap(), 1);
        txn.commit().await.unwrap();

        assert_eq!(t.large_object_count().await, 1);
    }
}
