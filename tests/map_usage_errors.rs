use half_disk_hashmap::{Config, DELETE_MARKER, INVALID_VALUE};
use test_log::test;

#[test]
#[should_panic(expected = "already open")]
fn map_nested_start_writing() {
    let folder = tempfile::tempdir().unwrap();
    let map = Config::new(&folder).open().unwrap();

    map.start_writing();
    map.start_writing();
}

#[test]
#[should_panic(expected = "not in a write cycle")]
fn map_put_outside_cycle() {
    let folder = tempfile::tempdir().unwrap();
    let map = Config::new(&folder).open().unwrap();

    map.put(b"a", 0, 1);
}

#[test]
#[should_panic(expected = "not in a write cycle")]
fn map_delete_outside_cycle() {
    let folder = tempfile::tempdir().unwrap();
    let map = Config::new(&folder).open().unwrap();

    map.delete(b"a", 0);
}

#[test]
#[should_panic(expected = "not in a write cycle")]
fn map_end_writing_without_cycle() {
    let folder = tempfile::tempdir().unwrap();
    let map = Config::new(&folder).open().unwrap();

    let _ = map.end_writing();
}

#[test]
#[should_panic(expected = "not in a write cycle")]
fn map_put_after_end_writing() {
    let folder = tempfile::tempdir().unwrap();
    let map = Config::new(&folder).open().unwrap();

    map.start_writing();
    map.end_writing().unwrap();
    map.put(b"a", 0, 1);
}

#[test]
#[should_panic(expected = "map is closed")]
fn map_put_after_close() {
    let folder = tempfile::tempdir().unwrap();
    let map = Config::new(&folder).open().unwrap();

    map.start_writing();
    map.close().unwrap();
    map.put(b"a", 0, 1);
}

#[test]
#[should_panic(expected = "map is closed")]
fn map_start_writing_after_close() {
    let folder = tempfile::tempdir().unwrap();
    let map = Config::new(&folder).open().unwrap();

    map.close().unwrap();
    map.start_writing();
}

#[test]
#[should_panic(expected = "reserved value")]
fn map_put_invalid_value() {
    let folder = tempfile::tempdir().unwrap();
    let map = Config::new(&folder).open().unwrap();

    map.start_writing();
    map.put(b"a", 0, INVALID_VALUE);
}

#[test]
#[should_panic(expected = "reserved value")]
fn map_put_delete_marker() {
    let folder = tempfile::tempdir().unwrap();
    let map = Config::new(&folder).open().unwrap();

    map.start_writing();
    map.put_if_equal(b"a", 0, 1, DELETE_MARKER);
}
