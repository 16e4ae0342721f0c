use buildtrack::context::{MessageLevel, RecordingContext};
use buildtrack::tracking::{
    ConfigCodec, DefinitionIdentity, RepositoryHints, TrackingManager, TrackingRecordBase,
};
use buildtrack::config::WorkspaceLayout;
use std::fs;
use tempfile::TempDir;

fn setup() -> (TempDir, TrackingManager) {
    let temp = TempDir::new().unwrap();
    let manager = TrackingManager::new(WorkspaceLayout::new(temp.path()));
    (temp, manager)
}

#[test]
fn two_definitions_get_consecutive_directories() {
    let (temp, manager) = setup();
    let ctx = RecordingContext::new();
    let hints = RepositoryHints::default();

    let abc = manager
        .create(&ctx, &DefinitionIdentity::new("c", "1"), "abc", &hints, false)
        .unwrap();
    let xyz = manager
        .create(&ctx, &DefinitionIdentity::new("c", "2"), "xyz", &hints, false)
        .unwrap();
    assert_eq!(abc.build_directory_number, 1);
    assert_eq!(xyz.build_directory_number, 2);

    let abc_path = manager.tracking_file_path("abc").unwrap();
    assert_eq!(
        abc_path,
        temp.path()
            .join("SourceRootMapping")
            .join("abc")
            .join("trackingfile.json")
    );
    let loaded = manager
        .load_if_exists(&ctx, &abc_path)
        .unwrap()
        .unwrap()
        .into_current()
        .unwrap();
    assert_eq!(loaded.build_directory_number, 1);

    let counter = fs::read_to_string(
        temp.path()
            .join("SourceRootMapping")
            .join("TopLevelTracking.json"),
    )
    .unwrap();
    assert!(counter.contains("\"lastDirectoryNumber\": 2"));
}

#[test]
fn corrupt_counter_resumes_after_existing_directories() {
    let (temp, manager) = setup();
    let ctx = RecordingContext::new();
    for n in 1..=5 {
        fs::create_dir_all(temp.path().join(n.to_string())).unwrap();
    }
    let mapping = temp.path().join("SourceRootMapping");
    fs::create_dir_all(&mapping).unwrap();
    fs::write(mapping.join("TopLevelTracking.json"), "{ truncated").unwrap();

    let record = manager
        .create(
            &ctx,
            &DefinitionIdentity::new("c", "1"),
            "abc",
            &RepositoryHints::default(),
            false,
        )
        .unwrap();

    assert_eq!(record.build_directory_number, 6);
    assert!(mapping.join("TopLevelTracking.json.corrupted").exists());
    assert!(!ctx.messages_at(MessageLevel::Warning).is_empty());
}

#[test]
fn prepare_reuses_directory_across_runs() {
    let (temp, manager) = setup();
    let ctx = RecordingContext::new();
    let identity = DefinitionIdentity::new("collection", "17")
        .with_definition_name("nightly")
        .with_repository_url("https://git.example/repo");
    let hints = RepositoryHints {
        repository_type: "git".to_string(),
        sources_directory: "src".to_string(),
    };

    let first = manager
        .prepare_directory(&ctx, &identity, &hints, false)
        .unwrap();
    assert!(temp.path().join("1").join("src").is_dir());
    assert!(temp.path().join("1").join("a").is_dir());
    assert!(temp.path().join("1").join("b").is_dir());
    assert!(temp.path().join("1").join("TestResults").is_dir());

    fs::remove_dir_all(temp.path().join("1").join("b")).unwrap();
    let second = manager
        .prepare_directory(&ctx, &identity, &hints, false)
        .unwrap();

    assert_eq!(second.build_directory, first.build_directory);
    assert!(second.record.last_run_on >= first.record.last_run_on);
    assert!(temp.path().join("1").join("b").is_dir());
    assert_eq!(second.record.hash_key, identity.hash_key());
}

#[test]
fn legacy_record_is_replaced_and_queued_for_deletion() {
    let (temp, manager) = setup();
    let ctx = RecordingContext::new();
    let identity = DefinitionIdentity::new("c", "5");
    let tracking_file = manager.tracking_file_path(&identity.hash_key()).unwrap();
    fs::create_dir_all(tracking_file.parent().unwrap()).unwrap();
    fs::write(
        &tracking_file,
        r#"{
  "system": "build",
  "collectionId": "c",
  "definitionId": "5",
  "build_dirctory": "C:\\agent\\_work\\7",
  "repositoryUrl": "https://git.example/old"
}"#,
    )
    .unwrap();
    fs::create_dir_all(temp.path().join("7")).unwrap();

    let legacy = manager
        .load_if_exists(&ctx, &tracking_file)
        .unwrap()
        .unwrap();
    assert!(legacy.is_legacy());
    assert_eq!(legacy.build_directory_number().unwrap(), 7);

    let prepared = manager
        .prepare_directory(&ctx, &identity, &RepositoryHints::default(), false)
        .unwrap();
    assert_eq!(prepared.record.build_directory_number, 8);

    let pending: Vec<_> = fs::read_dir(temp.path().join("SourceRootMapping").join("GC"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(pending.len(), 1);
    let queued = ConfigCodec::decode(&fs::read(&pending[0]).unwrap())
        .unwrap()
        .unwrap();
    match queued {
        TrackingRecordBase::Current(record) => {
            assert_eq!(record.build_directory_number, 7);
            assert_eq!(record.repository_url, "https://git.example/old");
            assert_eq!(record.last_run_on, None);
        }
        TrackingRecordBase::Legacy(_) => panic!("pending record must be in current format"),
    }
}
