//! The `objsync` diff/fetch/merge pipeline, orchestrating
//! [`crate::objsync::listing`] (grammar + comm-merge), [`crate::objsync::client`]
//! (remote I/O) and [`crate::objsync::translate`] (local path mapping) into
//! eight numbered steps: list, diff, delete, add with striped workers,
//! update, merge, cleanup, and exit-code resolution — built around the
//! typed [`ListLine`]/[`MergeEvent`] model in `listing.rs` rather than ad
//! hoc line parsing at each call site.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::objsync::client::{ClientError, ObjectHead, ObjectStat, ObjectStoreClient};
use crate::objsync::config::SectionConfig;
use crate::objsync::listing::{self, ListLine, MergeEvent};
use crate::objsync::translate::{PathExcluder, PathTranslator};
use crate::objsync::AbortFlag;

const NEW_LISTING_REUSE_WINDOW: Duration = Duration::from_secs(18 * 3600);
const TIME_BUDGET: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("another objsync run holds the lock at {0}")]
    AlreadyLocked(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Which containers one invocation covers.
pub enum ContainerScope {
    Single(String),
    All,
}

/// The fixed metadata filenames under a per-section directory.
pub struct MetadataPaths {
    pub dir: PathBuf,
}

impl MetadataPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
    pub fn cur(&self) -> PathBuf {
        self.dir.join("planb-objsync.cur")
    }
    pub fn new_file(&self) -> PathBuf {
        self.dir.join("planb-objsync.new")
    }
    pub fn add(&self) -> PathBuf {
        self.dir.join("planb-objsync.add")
    }
    pub fn del(&self) -> PathBuf {
        self.dir.join("planb-objsync.del")
    }
    pub fn utime(&self) -> PathBuf {
        self.dir.join("planb-objsync.utime")
    }
    pub fn lock(&self) -> PathBuf {
        self.dir.join("planb-objsync.lock")
    }
}

/// Exclusive `O_EXCL` lock file, removed on every exit path.
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub fn acquire(path: PathBuf) -> Result<Self, SyncError> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(SyncError::AlreadyLocked(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub hard_failures: Vec<String>,
    pub transient_failures: Vec<String>,
}

impl SyncOutcome {
    /// The exit-code rule: non-zero unless wall time exceeded
    /// the 30-minute budget and only transient failures were seen ("the
    /// next run will heal").
    pub fn exit_code(&self, wall_time: Duration) -> i32 {
        if self.hard_failures.is_empty() {
            if self.transient_failures.is_empty() {
                return 0;
            }
            if wall_time > TIME_BUDGET {
                return 0;
            }
            return 1;
        }
        1
    }
}

/// Build (or reuse) the remote listing for `container` into `.new`-shaped
/// records, applying exclusion rules. Reuses an existing
/// `.new` file younger than [`NEW_LISTING_REUSE_WINDOW`] so an interrupted
/// run can resume instead of re-listing from scratch.
fn build_remote_listing(
    client: &dyn ObjectStoreClient,
    section: &SectionConfig,
    containers: &[String],
    paths: &MetadataPaths,
) -> Result<Vec<ListLine>, SyncError> {
    if let Ok(meta) = std::fs::metadata(paths.new_file()) {
        if let Ok(modified) = meta.modified() {
            if modified.elapsed().unwrap_or(Duration::MAX) < NEW_LISTING_REUSE_WINDOW {
                return Ok(listing::read_list_file(&paths.new_file())?);
            }
        }
    }

    let multi = containers.len() > 1;
    let mut lines = Vec::new();
    for container in containers {
        let objects = client.list_container(container)?;
        for object in objects {
            if section.excluder.is_excluded(container, &object.path) {
                continue;
            }
            let size = resolve_true_size(client, section, container, &object)?;
            lines.push(ListLine {
                container: multi.then(|| container.clone()),
                path: object.path,
                modified: object.modified,
                size,
            });
        }
    }
    lines.sort_by(listing::sort_key_cmp);
    lines.dedup_by(|a, b| a.key() == b.key());
    listing::write_list_file(&paths.new_file(), &lines)?;
    Ok(lines)
}

/// A zero-sized listing entry on a segmented-object container is a
/// placeholder; HEAD gets the true concatenated size.
fn resolve_true_size(
    client: &dyn ObjectStoreClient,
    section: &SectionConfig,
    container: &str,
    object: &ObjectStat,
) -> Result<u64, SyncError> {
    use crate::objsync::config::SegmentPolicy;
    let needs_head = match section.segment_policy {
        SegmentPolicy::Always => true,
        SegmentPolicy::Autodetect => object.size == 0,
    };
    if !needs_head {
        return Ok(object.size);
    }
    let head = client.head_object(container, &object.path)?;
    Ok(head.size)
}

fn local_path(root: &Path, translator: &PathTranslator, container: &str, remote_path: &str) -> PathBuf {
    root.join(translator.translate(container, remote_path))
}

/// Delete phase: unlink every `.del` entry's local file,
/// returning the subset that actually succeeded so the caller can
/// merge-subtract only those from `.cur`.
fn run_delete_phase(root: &Path, translator: &PathTranslator, dels: &[ListLine]) -> (Vec<ListLine>, Vec<String>) {
    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for entry in dels {
        let container = entry.container.as_deref().unwrap_or("");
        let path = local_path(root, translator, container, &entry.path);
        match std::fs::remove_file(&path) {
            Ok(()) => successes.push(entry.clone()),
            Err(_) if !path.exists() => successes.push(entry.clone()),
            Err(e) => failures.push(format!("deleting {}: {e}", path.display())),
        }
    }
    successes.sort_by(listing::sort_key_cmp);
    (successes, failures)
}

enum DownloadOutcome {
    Success(ListLine),
    Transient(String),
    Fatal(String),
}

/// Download one object, verifying content against its ETag where feasible
///, then set local mtime to the record's modified time.
fn download_one(
    client: &dyn ObjectStoreClient,
    root: &Path,
    translator: &PathTranslator,
    entry: &ListLine,
    abort: &AbortFlag,
) -> DownloadOutcome {
    let container = entry.container.as_deref().unwrap_or("");
    let dest = local_path(root, translator, container, &entry.path);
    if let Some(parent) = dest.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return DownloadOutcome::Fatal(format!("mkdir {}: {e}", parent.display()));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
        }
    }

    let mut digest = md5::Context::new();
    let mut written = 0u64;
    let tmp_path = dest.with_extension("objsync-tmp");
    let file = match File::create(&tmp_path) {
        Ok(f) => f,
        Err(e) => return DownloadOutcome::Fatal(format!("creating {}: {e}", tmp_path.display())),
    };
    let file = Mutex::new(file);

    let result = client.get_object(container, &entry.path, &mut |chunk| {
        if abort.is_set() {
            return Err(ClientError::Transient("aborted mid-download".to_string()));
        }
        digest.consume(chunk);
        written += chunk.len() as u64;
        file.lock()
            .unwrap()
            .write_all(chunk)
            .map_err(|e| ClientError::Transient(format!("writing {}: {e}", tmp_path.display())))
    });

    let total = match result {
        Ok(total) => total,
        Err(ClientError::Transient(e)) => {
            let _ = std::fs::remove_file(&tmp_path);
            return DownloadOutcome::Transient(e);
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            return DownloadOutcome::Fatal(e.to_string());
        }
    };

    if total != entry.size {
        let _ = std::fs::remove_file(&tmp_path);
        return match client.head_object(container, &entry.path) {
            Ok(head) if head.modified == entry.modified => DownloadOutcome::Fatal(format!(
                "{}: permanent size mismatch ({total} != {})",
                entry.path, entry.size
            )),
            Ok(_) => DownloadOutcome::Transient(format!(
                "{}: object mutated during run",
                entry.path
            )),
            Err(e) => DownloadOutcome::Transient(e.to_string()),
        };
    }

    if let Ok(head) = client.head_object(container, &entry.path) {
        if let Some(etag) = &head.etag {
            if head.etag_is_plain_md5() {
                let hex = format!("{:x}", digest.compute());
                if &hex != etag {
                    let _ = std::fs::remove_file(&tmp_path);
                    return DownloadOutcome::Fatal(format!("{}: md5 mismatch with ETag", entry.path));
                }
            }
        }
    }

    if let Err(e) = std::fs::rename(&tmp_path, &dest) {
        return DownloadOutcome::Fatal(format!("renaming into place {}: {e}", dest.display()));
    }
    set_mtime(&dest, entry.modified);
    DownloadOutcome::Success(entry.clone())
}

fn set_mtime(path: &Path, at: chrono::DateTime<Utc>) {
    let time = filetime::FileTime::from_unix_time(at.timestamp(), 0);
    let _ = filetime::set_file_times(path, time, time);
}

/// Add phase: `N` worker threads, each taking every Nth
/// record by index (stable striping, no shared queue). Returns the
/// successfully-downloaded records (already ascending per worker, so the
/// merged result only needs a final sort) plus any failures observed.
fn run_add_phase(
    client: &dyn ObjectStoreClient,
    root: &Path,
    translator: &PathTranslator,
    additions: &[ListLine],
    worker_count: usize,
    abort: &AbortFlag,
) -> (Vec<ListLine>, Vec<String>, Vec<String>) {
    if additions.is_empty() {
        return (Vec::new(), Vec::new(), Vec::new());
    }
    let worker_count = worker_count.max(1);
    let successes = Mutex::new(Vec::new());
    let transient = Mutex::new(Vec::new());
    let fatal = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for worker_id in 0..worker_count {
            let successes = &successes;
            let transient = &transient;
            let fatal = &fatal;
            scope.spawn(move || {
                let mut local_successes = Vec::new();
                let mut idx = worker_id;
                while idx < additions.len() {
                    if abort.is_set() {
                        break;
                    }
                    match download_one(client, root, translator, &additions[idx], abort) {
                        DownloadOutcome::Success(entry) => local_successes.push(entry),
                        DownloadOutcome::Transient(msg) => transient.lock().unwrap().push(msg),
                        DownloadOutcome::Fatal(msg) => fatal.lock().unwrap().push(msg),
                    }
                    idx += worker_count;
                }
                successes.lock().unwrap().extend(local_successes);
            });
        }
    });

    let mut successes = successes.into_inner().unwrap();
    successes.sort_by(listing::sort_key_cmp);
    (successes, transient.into_inner().unwrap(), fatal.into_inner().unwrap())
}

/// Update phase: HEAD the object; if its ETag matches the
/// local file's MD5, only the mtime needs updating locally. Otherwise the
/// record is a redownload candidate (handled by the caller via the add
/// phase's `download_one`).
fn run_update_phase(
    client: &dyn ObjectStoreClient,
    root: &Path,
    translator: &PathTranslator,
    utimes: &[ListLine],
    abort: &AbortFlag,
) -> (Vec<ListLine>, Vec<ListLine>, Vec<String>) {
    let mut touched = Vec::new();
    let mut needs_redownload = Vec::new();
    let mut failures = Vec::new();

    for entry in utimes {
        if abort.is_set() {
            break;
        }
        let container = entry.container.as_deref().unwrap_or("");
        let head = match client.head_object(container, &entry.path) {
            Ok(h) => h,
            Err(e) => {
                failures.push(e.to_string());
                continue;
            }
        };
        let path = local_path(root, translator, container, &entry.path);
        let matches = head.etag_is_plain_md5()
            && local_md5_matches(&path, head.etag.as_deref().unwrap_or_default());
        if matches {
            set_mtime(&path, entry.modified);
            touched.push(entry.clone());
        } else {
            needs_redownload.push(entry.clone());
        }
    }
    (touched, needs_redownload, failures)
}

fn local_md5_matches(path: &Path, etag: &str) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; 65536];
    loop {
        let Ok(n) = std::io::Read::read(&mut file, &mut buf) else {
            return false;
        };
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    format!("{:x}", ctx.compute()) == etag
}

/// Step 3's classification, split into the three work queues the
/// remaining phases consume.
struct Diff {
    dels: Vec<ListLine>,
    adds: Vec<ListLine>,
    utimes: Vec<ListLine>,
}

fn classify(events: Vec<MergeEvent>) -> Diff {
    let mut dels = Vec::new();
    let mut adds = Vec::new();
    let mut utimes = Vec::new();
    for event in events {
        match event {
            MergeEvent::Same(_) => {}
            MergeEvent::LeftOnly(l) => dels.push(l),
            MergeEvent::RightOnly(r) => adds.push(r),
            MergeEvent::DiffMtime { left: _, right } => utimes.push(right),
            MergeEvent::DiffSize { left, right } => {
                dels.push(left);
                adds.push(right);
            }
        }
    }
    dels.sort_by(listing::sort_key_cmp);
    adds.sort_by(listing::sort_key_cmp);
    utimes.sort_by(listing::sort_key_cmp);
    Diff { dels, adds, utimes }
}

/// Run the full diff-and-fetch pipeline for one section/container-scope. `root` is
/// the local directory data is mirrored into.
pub fn run(
    client: &dyn ObjectStoreClient,
    section: &SectionConfig,
    scope: ContainerScope,
    root: &Path,
    paths: &MetadataPaths,
    abort: &AbortFlag,
) -> Result<SyncOutcome, SyncError> {
    let start = Instant::now();
    std::fs::create_dir_all(&paths.dir)?;
    let _lock = LockGuard::acquire(paths.lock())?;

    let containers = match scope {
        ContainerScope::Single(name) => vec![name],
        ContainerScope::All => client.list_containers()?,
    };

    let cur = listing::read_list_file(&paths.cur())?;
    let new = build_remote_listing(client, section, &containers, paths)?;

    let events = listing::comm_merge(&cur, &new);
    let diff = classify(events);
    listing::write_list_file(&paths.del(), &diff.dels)?;
    listing::write_list_file(&paths.add(), &diff.adds)?;
    listing::write_list_file(&paths.utime(), &diff.utimes)?;

    let mut outcome = SyncOutcome::default();

    let (del_successes, del_failures) = run_delete_phase(root, &section.translator, &diff.dels);
    outcome.deleted = del_successes.len();
    outcome.hard_failures.extend(del_failures);
    let mut current = listing::merge_subtract(&cur, &del_successes);

    let (add_successes, add_transient, add_fatal) = run_add_phase(
        client,
        root,
        &section.translator,
        &diff.adds,
        section.worker_count,
        abort,
    );
    outcome.added = add_successes.len();
    outcome.transient_failures.extend(add_transient);
    outcome.hard_failures.extend(add_fatal);
    current = listing::merge_add(&current, &add_successes);

    let (touched, needs_redownload, update_failures) =
        run_update_phase(client, root, &section.translator, &diff.utimes, abort);
    outcome.updated += touched.len();
    outcome.transient_failures.extend(update_failures);
    current = listing::merge_add(&current, &touched);

    if !needs_redownload.is_empty() {
        let (redownload_successes, redownload_transient, redownload_fatal) = run_add_phase(
            client,
            root,
            &section.translator,
            &needs_redownload,
            section.worker_count,
            abort,
        );
        outcome.updated += redownload_successes.len();
        outcome.transient_failures.extend(redownload_transient);
        outcome.hard_failures.extend(redownload_fatal);
        current = listing::merge_add(&current, &redownload_successes);
    }

    listing::write_list_file(&paths.cur(), &current)?;

    for path in [paths.new_file(), paths.add(), paths.del(), paths.utime()] {
        let _ = std::fs::remove_file(path);
    }

    let wall_time = start.elapsed();
    let _ = outcome.exit_code(wall_time);
    Ok(outcome)
}

/// A free-running counter usable as a striping cursor when a caller wants
/// to hand out work items from multiple call sites without a shared queue.
/// Not used by [`run_add_phase`] itself (its striping is index-based and
/// needs no shared state) but kept for callers building their own worker
/// loops around [`download_one`]-shaped work outside the pipeline above.
pub fn next_stripe(counter: &AtomicU32, worker_count: u32) -> u32 {
    counter.fetch_add(1, Ordering::Relaxed) % worker_count.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objsync::config::{ObjsyncConfig, SectionConfig};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct MockClient {
        containers: Vec<String>,
        objects: HashMap<String, Vec<ObjectStat>>,
        bodies: HashMap<(String, String), Vec<u8>>,
        etags: HashMap<(String, String), String>,
        head_calls: StdMutex<u32>,
    }

    impl ObjectStoreClient for MockClient {
        fn list_containers(&self) -> Result<Vec<String>, ClientError> {
            Ok(self.containers.clone())
        }

        fn list_container(&self, container: &str) -> Result<Vec<ObjectStat>, ClientError> {
            Ok(self.objects.get(container).cloned().unwrap_or_default())
        }

        fn head_object(&self, container: &str, path: &str) -> Result<ObjectHead, ClientError> {
            *self.head_calls.lock().unwrap() += 1;
            let body = self
                .bodies
                .get(&(container.to_string(), path.to_string()))
                .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
            let etag = self
                .etags
                .get(&(container.to_string(), path.to_string()))
                .cloned()
                .unwrap_or_else(|| format!("{:x}", md5::compute(body)));
            Ok(ObjectHead {
                size: body.len() as u64,
                modified: Utc::now(),
                etag: Some(etag),
            })
        }

        fn get_object(
            &self,
            container: &str,
            path: &str,
            sink: &mut dyn FnMut(&[u8]) -> Result<(), ClientError>,
        ) -> Result<u64, ClientError> {
            let body = self
                .bodies
                .get(&(container.to_string(), path.to_string()))
                .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
            sink(body)?;
            Ok(body.len() as u64)
        }
    }

    fn dummy_section() -> SectionConfig {
        let cfg = ObjsyncConfig::from_str("[s]\nendpoint=https://example.org\n").unwrap();
        let section = cfg.section("s").unwrap();
        // SectionConfig has no Clone; rebuild from the same raw text per test.
        let SectionConfig {
            name,
            endpoint,
            access_key_id,
            secret_access_key,
            ca_cert,
            insecure,
            timeouts,
            segment_policy,
            worker_count,
            ..
        } = section;
        SectionConfig {
            name: name.clone(),
            endpoint: endpoint.clone(),
            access_key_id: access_key_id.clone(),
            secret_access_key: secret_access_key.clone(),
            ca_cert: ca_cert.clone(),
            insecure: *insecure,
            timeouts: *timeouts,
            segment_policy: *segment_policy,
            worker_count: *worker_count,
            translator: PathTranslator::new(Vec::new()),
            excluder: PathExcluder::new(Vec::new()),
        }
    }

    #[test]
    fn fresh_sync_downloads_everything_in_remote() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let metadata = MetadataPaths::new(tmp.path().join("meta"));

        let mut objects = HashMap::new();
        objects.insert(
            "c1".to_string(),
            vec![ObjectStat {
                path: "a.txt".to_string(),
                size: 5,
                modified: Utc::now(),
            }],
        );
        let mut bodies = HashMap::new();
        bodies.insert(("c1".to_string(), "a.txt".to_string()), b"hello".to_vec());

        let client = MockClient {
            containers: vec!["c1".to_string()],
            objects,
            bodies,
            etags: HashMap::new(),
            head_calls: StdMutex::new(0),
        };
        let section = dummy_section();
        let abort = AbortFlag::new();

        let outcome = run(
            &client,
            &section,
            ContainerScope::Single("c1".to_string()),
            &root,
            &metadata,
            &abort,
        )
        .unwrap();

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.deleted, 0);
        assert!(outcome.hard_failures.is_empty());
        assert_eq!(std::fs::read(root.join("a.txt")).unwrap(), b"hello");
        let cur = listing::read_list_file(&metadata.cur()).unwrap();
        assert_eq!(cur.len(), 1);
    }

    #[test]
    fn second_sync_against_same_state_downloads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("data");
        std::fs::create_dir_all(&root).unwrap();
        let metadata = MetadataPaths::new(tmp.path().join("meta"));

        let mut objects = HashMap::new();
        objects.insert(
            "c1".to_string(),
            vec![ObjectStat {
                path: "a.txt".to_string(),
                size: 5,
                modified: Utc::now(),
            }],
        );
        let mut bodies = HashMap::new();
        bodies.insert(("c1".to_string(), "a.txt".to_string()), b"hello".to_vec());

        let client = MockClient {
            containers: vec!["c1".to_string()],
            objects,
            bodies,
            etags: HashMap::new(),
            head_calls: StdMutex::new(0),
        };
        let section = dummy_section();
        let abort = AbortFlag::new();

        run(
            &client,
            &section,
            ContainerScope::Single("c1".to_string()),
            &root,
            &metadata,
            &abort,
        )
        .unwrap();
        // Force the cached .new listing to be treated as reusable doesn't
        // matter here: a second run with an identical .cur/remote state
        // must produce zero downloads regardless.
        let outcome = run(
            &client,
            &section,
            ContainerScope::Single("c1".to_string()),
            &root,
            &metadata,
            &abort,
        )
        .unwrap();
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.deleted, 0);
        assert_eq!(outcome.updated, 0);
    }

    #[test]
    fn lock_guard_refuses_double_acquire() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join("planb-objsync.lock");
        let first = LockGuard::acquire(lock_path.clone()).unwrap();
        let second = LockGuard::acquire(lock_path.clone());
        assert!(matches!(second, Err(SyncError::AlreadyLocked(_))));
        drop(first);
        assert!(LockGuard::acquire(lock_path).is_ok());
    }

    #[test]
    fn exit_code_zero_on_clean_run() {
        let outcome = SyncOutcome::default();
        assert_eq!(outcome.exit_code(Duration::from_secs(1)), 0);
    }

    #[test]
    fn exit_code_nonzero_on_hard_failure() {
        let mut outcome = SyncOutcome::default();
        outcome.hard_failures.push("boom".to_string());
        assert_eq!(outcome.exit_code(Duration::from_secs(1)), 1);
    }

    #[test]
    fn transient_only_failure_heals_after_time_budget() {
        let mut outcome = SyncOutcome::default();
        outcome.transient_failures.push("timeout".to_string());
        assert_eq!(outcome.exit_code(Duration::from_secs(1)), 1);
        assert_eq!(outcome.exit_code(TIME_BUDGET + Duration::from_secs(1)), 0);
    }
}
