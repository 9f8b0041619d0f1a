use half_disk_hashmap::{Config, KeySerializer, LongKeySerializer, INVALID_VALUE};
use test_log::test;

const ITEM_COUNT: u64 = 10_000;

fn get(map: &half_disk_hashmap::HalfDiskHashMap, key: u64) -> half_disk_hashmap::Result<i64> {
    let key = LongKeySerializer.serialize(&key);
    map.get(&key.bytes, key.hash, INVALID_VALUE)
}

#[test]
#[allow(clippy::cast_possible_wrap)]
fn map_end_to_end() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let snapshot_folder = tempfile::tempdir()?;

    let map = Config::new(&folder).capacity(ITEM_COUNT).open()?;

    map.start_writing();
    for i in 0..ITEM_COUNT {
        let key = LongKeySerializer.serialize(&i);
        map.put(&key.bytes, key.hash, i as i64);
    }
    map.end_writing()?;

    for i in 0..ITEM_COUNT {
        assert_eq!(i as i64, get(&map, i)?);
    }

    let deleted = [1_234, 5_000, 9_876];

    map.start_writing();
    for i in deleted {
        let key = LongKeySerializer.serialize(&i);
        map.delete(&key.bytes, key.hash);
    }
    map.end_writing()?;

    for i in 0..ITEM_COUNT {
        let expected = if deleted.contains(&i) {
            INVALID_VALUE
        } else {
            i as i64
        };
        assert_eq!(expected, get(&map, i)?);
    }

    let snapshot_path = snapshot_folder.path().join("snapshot");
    map.snapshot(&snapshot_path)?;

    {
        let snapshot = Config::new(&snapshot_path).open()?;
        assert_eq!(map.bucket_count(), snapshot.bucket_count());

        for i in 0..ITEM_COUNT {
            assert_eq!(get(&map, i)?, get(&snapshot, i)?);
        }

        snapshot.close()?;
    }

    map.start_writing();
    for i in 2_000..3_000 {
        let key = LongKeySerializer.serialize(&i);
        map.put(&key.bytes, key.hash, i as i64 * 3);
    }
    map.end_writing()?;

    for i in 0..ITEM_COUNT {
        let expected = if deleted.contains(&i) {
            INVALID_VALUE
        } else if (2_000..3_000).contains(&i) {
            i as i64 * 3
        } else {
            i as i64
        };
        assert_eq!(expected, get(&map, i)?);
    }

    map.close()?;

    Ok(())
}

#[test]
fn map_empty_cycle_is_noop() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let map = Config::new(&folder).open()?;

    map.start_writing();
    assert!(map.is_writing());
    map.end_writing()?;
    assert!(!map.is_writing());

    assert_eq!(0, map.data_file_count());
    assert_eq!(INVALID_VALUE, get(&map, 5)?);

    Ok(())
}

#[test]
fn map_delete_missing_key() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let map = Config::new(&folder).capacity(100).open()?;

    map.start_writing();
    let key = LongKeySerializer.serialize(&7);
    map.delete(&key.bytes, key.hash);
    map.end_writing()?;

    // Bucket did not exist and is still empty
    assert_eq!(0, map.data_file_count());
    assert_eq!(INVALID_VALUE, get(&map, 7)?);

    Ok(())
}

#[test]
fn map_last_write_in_cycle_wins() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let map = Config::new(&folder).capacity(100).open()?;

    let key = LongKeySerializer.serialize(&1);

    map.start_writing();
    map.put(&key.bytes, key.hash, 1);
    map.put(&key.bytes, key.hash, 2);
    map.delete(&key.bytes, key.hash);
    map.put(&key.bytes, key.hash, 3);
    map.end_writing()?;

    assert_eq!(3, get(&map, 1)?);

    map.start_writing();
    map.put(&key.bytes, key.hash, 4);
    map.delete(&key.bytes, key.hash);
    map.end_writing()?;

    assert_eq!(INVALID_VALUE, get(&map, 1)?);

    Ok(())
}

#[test]
fn map_not_found_value_is_caller_defined() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let map = Config::new(&folder).open()?;

    let key = LongKeySerializer.serialize(&1);
    assert_eq!(-1, map.get(&key.bytes, key.hash, -1)?);

    Ok(())
}

#[test]
fn map_single_flush_thread() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let map = Config::new(&folder)
        .capacity(1_000)
        .flush_threads(1)
        .reusable_bucket_pool_size(1)
        .open()?;

    map.start_writing();
    for i in 0..1_000u64 {
        let key = LongKeySerializer.serialize(&i);
        map.put(&key.bytes, key.hash, 1);
    }
    map.end_writing()?;

    for i in 0..1_000u64 {
        assert_eq!(1, get(&map, i)?);
    }

    Ok(())
}
