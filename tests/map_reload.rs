use half_disk_hashmap::{Config, KeySerializer, LongKeySerializer, INVALID_VALUE};
use test_log::test;

const ITEM_COUNT: u64 = 1_000;

#[test]
fn map_reload_smoke_test() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let key = LongKeySerializer.serialize(&1);

    {
        let map = Config::new(&folder).open()?;
        assert_eq!(0, map.data_file_count());

        map.start_writing();
        map.put(&key.bytes, key.hash, 1);
        map.end_writing()?;

        assert_eq!(1, map.data_file_count());
    }

    {
        let map = Config::new(&folder).open()?;
        assert_eq!(1, map.data_file_count());
        assert_eq!(1, map.get(&key.bytes, key.hash, INVALID_VALUE)?);
    }

    Ok(())
}

#[test]
#[allow(clippy::cast_possible_wrap)]
fn map_reload_after_close() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;

    let bucket_count = {
        let map = Config::new(&folder).capacity(ITEM_COUNT).open()?;

        for cycle in 0..3 {
            map.start_writing();
            for i in 0..ITEM_COUNT {
                let key = LongKeySerializer.serialize(&i);
                map.put(&key.bytes, key.hash, i as i64 + cycle);
            }
            map.end_writing()?;
        }

        map.close()?;
        map.bucket_count()
    };

    // Capacity of an existing map is ignored
    let map = Config::new(&folder).capacity(1).open()?;
    assert_eq!(bucket_count, map.bucket_count());
    assert_eq!(3, map.data_file_count());

    for i in 0..ITEM_COUNT {
        let key = LongKeySerializer.serialize(&i);
        assert_eq!(i as i64 + 2, map.get(&key.bytes, key.hash, INVALID_VALUE)?);
    }

    Ok(())
}

#[test]
fn map_close_discards_open_cycle() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let key = LongKeySerializer.serialize(&1);

    {
        let map = Config::new(&folder).open()?;

        map.start_writing();
        map.put(&key.bytes, key.hash, 1);
        map.close()?;

        assert!(map.is_closed());
        assert!(!map.is_writing());
    }

    let map = Config::new(&folder).open()?;
    assert_eq!(INVALID_VALUE, map.get(&key.bytes, key.hash, INVALID_VALUE)?);

    Ok(())
}

#[test]
fn map_get_after_close() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let map = Config::new(&folder).open()?;
    let key = LongKeySerializer.serialize(&1);

    map.start_writing();
    map.put(&key.bytes, key.hash, 1);
    map.end_writing()?;

    map.close()?;
    assert_eq!(INVALID_VALUE, map.get(&key.bytes, key.hash, INVALID_VALUE)?);
    assert_eq!(0, map.data_file_count());

    // Closing twice is fine
    map.close()?;

    Ok(())
}

#[test]
fn map_reload_removes_unfinished_files() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;
    let key = LongKeySerializer.serialize(&1);

    {
        let map = Config::new(&folder).open()?;
        map.start_writing();
        map.put(&key.bytes, key.hash, 1);
        map.end_writing()?;
    }

    let data_folder = folder.path().join("data");
    std::fs::write(data_folder.join("99"), b"half written")?;
    std::fs::write(data_folder.join(".DS_Store"), b"")?;
    std::fs::write(data_folder.join("._1"), b"")?;

    {
        let map = Config::new(&folder).open()?;
        assert_eq!(1, map.data_file_count());
        assert_eq!(1, map.get(&key.bytes, key.hash, INVALID_VALUE)?);
    }

    assert!(!data_folder.join("99").try_exists()?);
    assert!(data_folder.join(".DS_Store").try_exists()?);
    assert!(data_folder.join("._1").try_exists()?);

    Ok(())
}

#[test]
fn map_reload_missing_data_file() -> half_disk_hashmap::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let map = Config::new(&folder).open()?;
        let key = LongKeySerializer.serialize(&1);

        map.start_writing();
        map.put(&key.bytes, key.hash, 1);
        map.end_writing()?;
    }

    for dirent in std::fs::read_dir(folder.path().join("data"))? {
        std::fs::remove_file(dirent?.path())?;
    }

    assert!(matches!(
        Config::new(&folder).open(),
        Err(half_disk_hashmap::Error::Unrecoverable)
    ));

    Ok(())
}
