mod common;

use ouroboros_db::{
    DataRecord, ErrorKind, Index1, IndexedDataset, SimpleDataset, TxState,
};

use common::scratch;

fn rec(v: u32) -> DataRecord {
    DataRecord::new(v, v as f64, v)
}

#[test]
fn test_create_write_read() {
    let (_dir, name) = scratch("basic");
    let dataset = SimpleDataset::<DataRecord>::open_or_create(&name, 4, 100, 1).unwrap();
    assert_eq!(dataset.table_count(), 4);
    assert_eq!(dataset.rec_count(), 100);
    assert_eq!(dataset.version(), 1);
    assert_eq!(dataset.state(), TxState::Stopped);

    dataset.add_table(7).unwrap();
    assert!(dataset.table_exists(7));
    assert!(!dataset.table_exists(8));
    assert_eq!(dataset.key_count(), 1);

    {
        let session = dataset.session_wr(7).unwrap();
        let mut table = session.get_mut();
        for v in 0..10 {
            table.add(&rec(v)).unwrap();
        }
        drop(table);
        session.stop().unwrap();
    }

    let session = dataset.session_rd(7).unwrap();
    let table = session.get();
    assert_eq!(table.count(), 10);
    let records = table.read_list(table.beg_pos(), 10).unwrap();
    assert_eq!(records, (0..10).map(rec).collect::<Vec<_>>());
    drop(table);
    session.stop().unwrap();
}

#[test]
fn test_open_close_open_identity() {
    let (_dir, name) = scratch("reopen");
    {
        let dataset = SimpleDataset::<DataRecord>::open_or_create(&name, 2, 50, 3).unwrap();
        dataset.add_table(1).unwrap();
        let session = dataset.session_wr(1).unwrap();
        for v in [10, 20, 30].iter() {
            session.get_mut().add(&rec(*v)).unwrap();
        }
        session.stop().unwrap();
    }
    let before = common::file_bytes(&name);

    {
        let dataset = SimpleDataset::<DataRecord>::open(&name, 3).unwrap();
        assert!(dataset.table_exists(1));
        let session = dataset.session_rd(1).unwrap();
        let got: Vec<u32> = session
            .get()
            .read_list(0, 3)
            .unwrap()
            .iter()
            .map(|r| r.field1)
            .collect();
        assert_eq!(got, vec![10, 20, 30]);
        session.stop().unwrap();
    }

    // a quiescent open-close cycle leaves the file byte-identical
    assert_eq!(common::file_bytes(&name), before);
}

#[test]
fn test_version_mismatch() {
    let (_dir, name) = scratch("version");
    {
        SimpleDataset::<DataRecord>::open_or_create(&name, 2, 10, 5).unwrap();
    }
    let err = SimpleDataset::<DataRecord>::open(&name, 6).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Version);
}

#[test]
fn test_missing_dataset() {
    let (_dir, name) = scratch("missing");
    let err = SimpleDataset::<DataRecord>::open(&name, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

#[test]
fn test_table_lifecycle_and_tombstone_reuse() {
    let (_dir, name) = scratch("tombstone");
    let dataset = SimpleDataset::<DataRecord>::open_or_create(&name, 3, 10, 1).unwrap();

    assert_eq!(dataset.add_table(100).unwrap(), 0);
    assert_eq!(dataset.add_table(200).unwrap(), 1);
    assert_eq!(dataset.add_table(300).unwrap(), 2);
    assert_eq!(dataset.key_list(), vec![100, 200, 300]);

    // the dataset is full
    let err = dataset.add_table(400).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    // and keys are unique
    let err = dataset.add_table(200).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);

    // removing frees the lowest slot for the next key
    assert_eq!(dataset.remove_table(200).unwrap(), 2);
    assert!(!dataset.table_exists(200));
    assert_eq!(dataset.add_table(400).unwrap(), 1);
    assert_eq!(dataset.key_list(), vec![100, 300, 400]);

    let err = dataset.remove_table(200).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

#[test]
fn test_removed_table_is_unreachable() {
    let (_dir, name) = scratch("removed");
    let dataset = SimpleDataset::<DataRecord>::open_or_create(&name, 2, 10, 1).unwrap();
    dataset.add_table(5).unwrap();
    {
        let session = dataset.session_wr(5).unwrap();
        session.get_mut().add(&rec(1)).unwrap();
        session.stop().unwrap();
    }
    dataset.remove_table(5).unwrap();
    let err = dataset.session_rd(5).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

#[test]
fn test_user_data_persists() {
    let (_dir, name) = scratch("userdata");
    {
        let dataset = SimpleDataset::<DataRecord>::open_or_create(&name, 1, 10, 1).unwrap();
        assert_eq!(dataset.set_user_data(b"hello ouroboros").unwrap(), 15);
    }
    {
        let dataset = SimpleDataset::<DataRecord>::open(&name, 1).unwrap();
        let mut buf = [0u8; 15];
        assert_eq!(dataset.get_user_data(&mut buf), 15);
        assert_eq!(&buf, b"hello ouroboros");
    }
}

#[test]
fn test_circular_overwrite_through_sessions() {
    let (_dir, name) = scratch("ring");
    let dataset = SimpleDataset::<DataRecord>::open_or_create(&name, 1, 4, 1).unwrap();
    dataset.add_table(0).unwrap();

    let session = dataset.session_wr(0).unwrap();
    for v in [10, 20, 30, 40, 50, 60].iter() {
        session.get_mut().add(&rec(*v)).unwrap();
    }
    {
        let table = session.get();
        assert_eq!(table.beg_pos(), 2);
        assert_eq!(table.end_pos(), 2);
        assert_eq!(table.count(), 4);
    }
    session.stop().unwrap();

    let session = dataset.session_rd(0).unwrap();
    let got: Vec<u32> = {
        let table = session.get();
        table
            .read_list(table.beg_pos(), 4)
            .unwrap()
            .iter()
            .map(|r| r.field1)
            .collect()
    };
    assert_eq!(got, vec![30, 40, 50, 60]);
    session.stop().unwrap();
}

#[test]
fn test_remove_dataset() {
    let (_dir, name) = scratch("removeall");
    {
        let dataset = SimpleDataset::<DataRecord>::open_or_create(&name, 1, 10, 1).unwrap();
        dataset.add_table(0).unwrap();
        let session = dataset.session_wr(0).unwrap();
        session.get_mut().add(&rec(1)).unwrap();
        session.stop().unwrap();
    }
    SimpleDataset::<DataRecord>::remove(&name).unwrap();
    assert!(!std::path::Path::new(&ouroboros_db::make_dbname(&name)).exists());
    let err = SimpleDataset::<DataRecord>::open(&name, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

#[test]
fn test_backup_variant_round_trip() {
    use ouroboros_db::FileVariant;

    let (_dir, name) = scratch("backupvar");
    let dataset = SimpleDataset::<DataRecord>::open_or_create_with(
        &name,
        1,
        16,
        1,
        FileVariant::Backup,
    )
    .unwrap();
    dataset.add_table(0).unwrap();
    {
        let session = dataset.session_wr(0).unwrap();
        session.get_mut().add(&rec(11)).unwrap();
        session.stop().unwrap();
    }
    {
        let session = dataset.session_wr(0).unwrap();
        session.get_mut().add(&rec(12)).unwrap();
        session.cancel().unwrap();
    }
    let session = dataset.session_rd(0).unwrap();
    let table = session.get();
    assert_eq!(table.count(), 1);
    assert_eq!(table.read_back().unwrap(), Some(rec(11)));
}

#[test]
fn test_indexed_dataset_range_read() {
    let (_dir, name) = scratch("indexed");
    let dataset = IndexedDataset::<DataRecord, Index1>::open_or_create(&name, 1, 8, 1).unwrap();
    dataset.add_table(0).unwrap();

    let session = dataset.session_wr(0).unwrap();
    for v in [5, 2, 9, 2, 7].iter() {
        session.get_mut().add(&rec(*v)).unwrap();
    }
    session.stop().unwrap();

    let session = dataset.session_rd(0).unwrap();
    let got: Vec<u32> = session
        .get()
        .read_by_index(&2, &8, 0)
        .unwrap()
        .iter()
        .map(|r| r.field1)
        .collect();
    assert_eq!(got, vec![2, 2, 5, 7]);
    session.stop().unwrap();

    // the index survives a reopen by rescanning the table
    drop(dataset);
    let dataset = IndexedDataset::<DataRecord, Index1>::open(&name, 1).unwrap();
    let session = dataset.session_rd(0).unwrap();
    let got: Vec<u32> = session
        .get()
        .read_by_index(&2, &8, 0)
        .unwrap()
        .iter()
        .map(|r| r.field1)
        .collect();
    assert_eq!(got, vec![2, 2, 5, 7]);
    session.stop().unwrap();
}
