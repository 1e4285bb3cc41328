use sharddir::{
    ColumnType, Directory, DirectoryConfig, DirectoryError, DirectoryErrorCode, EntityDescriptor,
    LockLevel, Node, NodeId, PartitionDimension, Status, TopologyBuilder, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

fn region() -> PartitionDimension {
    TopologyBuilder::new()
        .entity(
            EntityDescriptor::new("region", ColumnType::String, "weatherstation", ColumnType::Integer)
                .index("continent", ColumnType::String),
        )
        .build()
        .expect("topology")
}

fn open_with_nodes(config: DirectoryConfig) -> Directory {
    let directory = Directory::open(config, region()).expect("open");
    directory.add_node(Node::new(1, "east", "sqlite://east")).expect("node 1");
    directory.add_node(Node::new(2, "west", "sqlite://west")).expect("node 2");
    directory
}

fn lock_level(err: DirectoryError) -> LockLevel {
    match err {
        DirectoryError::LockViolation { level, .. } => level,
        other => panic!("expected a lock violation, got {other}"),
    }
}

#[test]
fn read_only_is_the_or_of_key_and_node() {
    let directory = open_with_nodes(DirectoryConfig::default());
    let key = Value::from("NA");
    directory.insert_primary_index_key(NodeId(1), "NA").expect("key");
    assert!(!directory.get_read_only_of_primary_index_key(&key).expect("ro"));

    directory
        .update_node_status(NodeId(1), Status::ReadOnly)
        .expect("lock node");
    assert!(directory.get_read_only_of_primary_index_key(&key).expect("ro"));

    directory
        .update_node_status(NodeId(1), Status::Writable)
        .expect("unlock node");
    directory
        .update_primary_index_key_read_only(&key, true)
        .expect("lock key");
    assert!(directory.get_read_only_of_primary_index_key(&key).expect("ro"));
}

#[test]
fn system_lock_rejects_every_write() {
    let directory = open_with_nodes(DirectoryConfig::default());
    let station = directory.resource("weatherstation").expect("resource").clone();
    directory.insert_primary_index_key(NodeId(2), "EU").expect("key");
    directory.update_system_status(Status::ReadOnly).expect("lock system");

    let insert = directory
        .insert_primary_index_key(NodeId(2), "NA")
        .expect_err("insert");
    assert_eq!(lock_level(insert), LockLevel::System);
    let link = directory
        .insert_resource_id(&station, 1, "EU")
        .expect_err("resource id");
    assert_eq!(lock_level(link), LockLevel::System);
    let flag = directory
        .update_primary_index_key_read_only(&Value::from("EU"), true)
        .expect_err("key flag");
    assert_eq!(lock_level(flag), LockLevel::System);

    // reads are never gated
    assert!(directory.does_primary_index_key_exist(&Value::from("EU")).expect("exists"));
    assert_eq!(
        directory
            .get_node_ids_of_primary_index_key(&Value::from("EU"))
            .expect("nodes"),
        vec![NodeId(2)]
    );
}

#[test]
fn node_lock_only_gates_keys_on_that_node() {
    let directory = open_with_nodes(DirectoryConfig::default());
    let station = directory.resource("weatherstation").expect("resource").clone();
    directory.insert_primary_index_key(NodeId(1), "NA").expect("NA");
    directory.insert_primary_index_key(NodeId(2), "EU").expect("EU");
    directory
        .update_node_status(NodeId(1), Status::ReadOnly)
        .expect("lock node");

    let err = directory
        .insert_resource_id(&station, 1, "NA")
        .expect_err("node 1 locked");
    assert_eq!(lock_level(err), LockLevel::Node(NodeId(1)));
    let err = directory
        .insert_primary_index_key(NodeId(1), "SA")
        .expect_err("node 1 locked");
    assert_eq!(lock_level(err), LockLevel::Node(NodeId(1)));

    directory.insert_resource_id(&station, 2, "EU").expect("node 2 writable");
    directory.insert_primary_index_key(NodeId(2), "SA").expect("node 2 writable");
}

#[test]
fn key_lock_gates_writes_under_that_key() {
    let directory = open_with_nodes(DirectoryConfig::default());
    let station = directory.resource("weatherstation").expect("resource").clone();
    let continent = directory
        .secondary_index("weatherstation", "continent")
        .expect("index")
        .clone();
    directory.insert_primary_index_key(NodeId(1), "NA").expect("key");
    directory.insert_resource_id(&station, 9, "NA").expect("id");
    directory
        .update_primary_index_key_read_only(&Value::from("NA"), true)
        .expect("lock key");

    let err = directory
        .insert_secondary_index_key(&continent, "America", 9)
        .expect_err("key locked");
    assert_eq!(lock_level(err), LockLevel::Key);
    let err = directory
        .delete_resource_id(&station, &Value::from(9))
        .expect_err("key locked");
    assert_eq!(err.code(), DirectoryErrorCode::LockViolation);
}

#[test]
fn lock_state_survives_reopen() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("directory.db");
    {
        let directory = open_with_nodes(DirectoryConfig::persistent(&path));
        directory.insert_primary_index_key(NodeId(1), "NA").expect("key");
        directory
            .update_node_status(NodeId(2), Status::ReadOnly)
            .expect("lock node");
        directory.update_system_status(Status::ReadOnly).expect("lock system");
    }

    let reopened = Directory::open(DirectoryConfig::persistent(&path), region()).expect("reopen");
    assert_eq!(reopened.system_status(), Status::ReadOnly);
    let nodes = reopened.nodes();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[1].status, Status::ReadOnly);
    assert!(reopened.does_primary_index_key_exist(&Value::from("NA")).expect("exists"));

    reopened.update_system_status(Status::Writable).expect("unlock");
    reopened.insert_primary_index_key(NodeId(1), "EU").expect("writable again");
}

#[test]
fn concurrent_inserts_of_one_key_admit_exactly_one() {
    let directory = open_with_nodes(DirectoryConfig::default());
    let successes = AtomicUsize::new(0);
    let duplicates = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for n in 0..8u32 {
            let directory = &directory;
            let successes = &successes;
            let duplicates = &duplicates;
            scope.spawn(move || {
                match directory.insert_primary_index_key(NodeId(1 + n % 2), "contested") {
                    Ok(()) => {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => {
                        assert_eq!(err.code(), DirectoryErrorCode::DuplicateKey);
                        duplicates.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(duplicates.load(Ordering::SeqCst), 7);
    assert_eq!(
        directory
            .get_node_ids_of_primary_index_key(&Value::from("contested"))
            .expect("nodes")
            .len(),
        1
    );
}
