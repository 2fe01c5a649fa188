use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use deepcount_core::count::count_roots;
use deepcount_core::fs::LocalFileSystem;
use deepcount_core::{
    CancelToken, CountError, CountOptions, CountSnapshot, DeepCountJob, JobState, MainContext,
    TaskRunner,
};

fn write(path: &Path, len: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, vec![b'x'; len]).unwrap();
}

fn count(roots: &[PathBuf], options: &CountOptions) -> Result<CountSnapshot, CountError> {
    count_roots(&LocalFileSystem, roots, options, &CancelToken::new(), |_| {})
}

#[test]
fn directory_with_nested_subdirectory() {
    let tmp = tempfile::tempdir().unwrap();
    let a = tmp.path().join("A");
    write(&a.join("f1"), 10);
    write(&a.join("B").join("f2"), 20);

    let totals = count(&[a], &CountOptions::default()).unwrap();
    assert_eq!(
        totals,
        CountSnapshot {
            total_size: 30,
            file_count: 2,
            directory_count: 2,
            unreadable_directory_count: 0,
        }
    );
}

#[test]
fn plain_file_root() {
    let tmp = tempfile::tempdir().unwrap();
    let f1 = tmp.path().join("f1");
    write(&f1, 10);

    let totals = count(&[f1], &CountOptions::default()).unwrap();
    assert_eq!(totals.file_count, 1);
    assert_eq!(totals.directory_count, 0);
    assert_eq!(totals.total_size, 10);
}

#[test]
fn missing_root_is_an_error_naming_it() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("missing");

    match count(&[missing.clone()], &CountOptions::default()) {
        Err(CountError::Io { path, .. }) => assert_eq!(path, missing),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn empty_directory_counts_itself() {
    let tmp = tempfile::tempdir().unwrap();
    let totals = count(&[tmp.path().to_path_buf()], &CountOptions::default()).unwrap();
    assert_eq!(totals.directory_count, 1);
    assert_eq!(totals.file_count, 0);
}

#[cfg(unix)]
#[test]
fn symlinked_directories_are_only_walked_when_following() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    write(&data.join("blob"), 100);
    let tree = tmp.path().join("tree");
    fs::create_dir(&tree).unwrap();
    std::os::unix::fs::symlink(&data, tree.join("link")).unwrap();

    let plain = count(&[tree.clone()], &CountOptions::default()).unwrap();
    assert_eq!(plain.file_count, 1);
    assert_eq!(plain.directory_count, 1);

    let followed = count(&[tree], &CountOptions::default().follow_symlinks(true)).unwrap();
    assert_eq!(followed.file_count, 1);
    assert_eq!(followed.directory_count, 2);
    assert_eq!(followed.total_size, 100);
}

#[cfg(unix)]
#[test]
fn permission_denied_subdirectory_is_counted_as_unreadable() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    write(&root.join("visible"), 4);
    let locked = root.join("locked");
    write(&locked.join("hidden"), 1000);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users can still list the directory; nothing to check then.
    let effective = fs::read_dir(&locked).is_err();
    let result = count(&[root], &CountOptions::default());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    if effective {
        let totals = result.unwrap();
        assert_eq!(totals.unreadable_directory_count, 1);
        assert_eq!(totals.file_count, 1);
        assert_eq!(totals.total_size, 4);
        assert_eq!(totals.directory_count, 1);
    }
}

#[test]
fn job_counts_real_tree_in_the_background() {
    let tmp = tempfile::tempdir().unwrap();
    for i in 0..5 {
        write(&tmp.path().join(format!("d{i}")).join("f"), 3);
    }
    write(&tmp.path().join("top"), 7);

    let runner = TaskRunner::new().unwrap();
    let context = MainContext::new();
    let job = DeepCountJob::new(vec![tmp.path().to_path_buf()], CountOptions::default()).unwrap();

    let slot = Arc::new(Mutex::new(None));
    let done = slot.clone();
    let handle = job
        .run(&runner, &context.handle(), move |outcome| {
            *done.lock().unwrap() = Some(outcome)
        })
        .unwrap();
    assert_eq!(job.state(), JobState::Running);

    let deadline = Instant::now() + Duration::from_secs(10);
    assert!(context.run_until(deadline, || handle.is_finished()));

    let totals = slot.lock().unwrap().take().unwrap().unwrap();
    assert_eq!(totals.file_count, 6);
    assert_eq!(totals.directory_count, 6);
    assert_eq!(totals.total_size, 22);
    assert_eq!(job.state(), JobState::Succeeded);
}
