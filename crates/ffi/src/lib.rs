#![allow(unsafe_code)]

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::slice;

use deepcount_core::{
    CountError, CountOptions, CountSnapshot, DeepCountJob, Error, JobState, MainContext,
    TaskRunner,
};
use log::debug;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: impl Into<String>) {
    let cmsg = c_string_lossy(msg.into());
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some(cmsg);
    });
}

fn ok_last_error() {
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = None;
    });
}

#[repr(C)]
pub struct DeepcountRunner {
    runner: TaskRunner,
}

#[repr(C)]
pub struct DeepcountContext {
    context: MainContext,
}

#[repr(C)]
pub struct DeepcountJob {
    job: DeepCountJob,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeepcountSnapshot {
    pub total_size: u64,
    pub file_count: u64,
    pub directory_count: u64,
    pub unreadable_directory_count: u64,
}

impl From<CountSnapshot> for DeepcountSnapshot {
    fn from(s: CountSnapshot) -> Self {
        Self {
            total_size: s.total_size,
            file_count: s.file_count,
            directory_count: s.directory_count,
            unreadable_directory_count: s.unreadable_directory_count,
        }
    }
}

pub type DeepcountProgressCallback =
    Option<extern "C" fn(snapshot: *const DeepcountSnapshot, user_data: *mut libc::c_void)>;

/// `snapshot` is the final (or, when cancelled, partial) totals and is null
/// on failure. `error_message` is null unless `status` is `Error`.
pub type DeepcountDoneCallback = Option<
    extern "C" fn(
        status: DeepcountStatus,
        snapshot: *const DeepcountSnapshot,
        error_message: *const c_char,
        user_data: *mut libc::c_void,
    ),
>;

const FFI_ABI_MAJOR: u32 = 1;
const FFI_ABI_MINOR: u32 = 0;
const FFI_ABI_PATCH: u32 = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeepcountVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepcountStatus {
    Ok = 0,
    Error = 1,
    InvalidArgument = 2,
    NullPointer = 3,
    Cancelled = 4,
    AlreadyStarted = 5,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepcountJobState {
    Created = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
    Cancelled = 4,
}

impl From<JobState> for DeepcountJobState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Created => DeepcountJobState::Created,
            JobState::Running => DeepcountJobState::Running,
            JobState::Succeeded => DeepcountJobState::Succeeded,
            JobState::Failed => DeepcountJobState::Failed,
            JobState::Cancelled => DeepcountJobState::Cancelled,
        }
    }
}

/// Caller-owned pointer handed back to callbacks untouched. Callbacks only
/// ever run on the thread that iterates the context.
#[derive(Clone, Copy)]
struct UserData(*mut libc::c_void);

unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(self) -> *mut libc::c_void {
        self.0
    }
}

#[no_mangle]
pub extern "C" fn deepcount_ffi_version() -> DeepcountVersion {
    DeepcountVersion {
        major: FFI_ABI_MAJOR,
        minor: FFI_ABI_MINOR,
        patch: FFI_ABI_PATCH,
    }
}

#[no_mangle]
pub extern "C" fn deepcount_last_error_message() -> *const c_char {
    LAST_ERROR.with(|slot| match &*slot.borrow() {
        Some(msg) => msg.as_ptr(),
        None => std::ptr::null(),
    })
}

#[no_mangle]
pub extern "C" fn deepcount_runner_new() -> *mut DeepcountRunner {
    ok_last_error();
    match TaskRunner::new() {
        Ok(runner) => Box::into_raw(Box::new(DeepcountRunner { runner })),
        Err(e) => {
            set_last_error(e.to_string());
            std::ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn deepcount_runner_free(runner: *mut DeepcountRunner) {
    ok_last_error();
    if runner.is_null() {
        return;
    }
    drop(Box::from_raw(runner));
}

#[no_mangle]
pub extern "C" fn deepcount_context_new() -> *mut DeepcountContext {
    ok_last_error();
    Box::into_raw(Box::new(DeepcountContext {
        context: MainContext::new(),
    }))
}

#[no_mangle]
pub unsafe extern "C" fn deepcount_context_free(context: *mut DeepcountContext) {
    ok_last_error();
    if context.is_null() {
        return;
    }
    drop(Box::from_raw(context));
}

/// Runs one pending callback on the calling thread. Returns whether one ran.
#[no_mangle]
pub unsafe extern "C" fn deepcount_context_iteration(
    context: *mut DeepcountContext,
    may_block: bool,
) -> bool {
    ok_last_error();
    if context.is_null() {
        set_last_error("context is null");
        return false;
    }
    (*context).context.iteration(may_block)
}

#[no_mangle]
pub unsafe extern "C" fn deepcount_context_dispatch_pending(context: *mut DeepcountContext) -> usize {
    ok_last_error();
    if context.is_null() {
        set_last_error("context is null");
        return 0;
    }
    (*context).context.dispatch_pending()
}

/// Creates a job over `len` NUL-terminated UTF-8 paths. Returns null and
/// sets the last error when the list is empty or a path is invalid.
#[no_mangle]
pub unsafe extern "C" fn deepcount_job_new(
    paths: *const *const c_char,
    len: usize,
    follow_symlinks: bool,
) -> *mut DeepcountJob {
    ok_last_error();

    if paths.is_null() && len > 0 {
        set_last_error("paths is null");
        return std::ptr::null_mut();
    }

    let mut roots = Vec::with_capacity(len);
    if len > 0 {
        for &ptr in slice::from_raw_parts(paths, len) {
            if ptr.is_null() {
                set_last_error("path is null");
                return std::ptr::null_mut();
            }
            match c_path(ptr) {
                Ok(path) => roots.push(path),
                Err(e) => {
                    set_last_error(e);
                    return std::ptr::null_mut();
                }
            }
        }
    }

    let options = CountOptions::default().follow_symlinks(follow_symlinks);
    match DeepCountJob::new(roots, options) {
        Ok(job) => Box::into_raw(Box::new(DeepcountJob { job })),
        Err(e) => {
            set_last_error(e.to_string());
            std::ptr::null_mut()
        }
    }
}

/// Freeing a job that is still running cancels it. Its completion callback
/// still fires with `Cancelled` if the context keeps being iterated.
#[no_mangle]
pub unsafe extern "C" fn deepcount_job_free(job: *mut DeepcountJob) {
    ok_last_error();
    if job.is_null() {
        return;
    }
    let job = Box::from_raw(job);
    if job.job.state() == JobState::Running {
        debug!("job freed while running; cancelling");
        job.job.cancel();
    }
    drop(job);
}

/// Must be called before `deepcount_job_run`.
#[no_mangle]
pub unsafe extern "C" fn deepcount_job_set_progress_callback(
    job: *mut DeepcountJob,
    progress_cb: DeepcountProgressCallback,
    user_data: *mut libc::c_void,
) -> DeepcountStatus {
    ok_last_error();
    if job.is_null() {
        set_last_error("job is null");
        return DeepcountStatus::NullPointer;
    }
    let Some(cb) = progress_cb else {
        set_last_error("progress_cb is null");
        return DeepcountStatus::NullPointer;
    };
    if (*job).job.state() != JobState::Created {
        set_last_error("job has already been started");
        return DeepcountStatus::AlreadyStarted;
    }

    let user = UserData(user_data);
    (*job).job.on_progress(move |snapshot| {
        let payload = DeepcountSnapshot::from(*snapshot);
        cb(&payload, user.get());
    });
    DeepcountStatus::Ok
}

/// Starts the job. `done_cb` fires exactly once, from
/// `deepcount_context_iteration` on `context`.
#[no_mangle]
pub unsafe extern "C" fn deepcount_job_run(
    job: *mut DeepcountJob,
    runner: *mut DeepcountRunner,
    context: *mut DeepcountContext,
    done_cb: DeepcountDoneCallback,
    user_data: *mut libc::c_void,
) -> DeepcountStatus {
    ok_last_error();
    if job.is_null() {
        set_last_error("job is null");
        return DeepcountStatus::NullPointer;
    }
    if runner.is_null() {
        set_last_error("runner is null");
        return DeepcountStatus::NullPointer;
    }
    if context.is_null() {
        set_last_error("context is null");
        return DeepcountStatus::NullPointer;
    }

    let user = UserData(user_data);
    let result = (*job)
        .job
        .run(&(*runner).runner, &(*context).context.handle(), move |outcome| {
            let Some(cb) = done_cb else {
                return;
            };
            match outcome {
                Ok(totals) => {
                    let payload = DeepcountSnapshot::from(totals);
                    cb(DeepcountStatus::Ok, &payload, std::ptr::null(), user.get());
                }
                Err(CountError::Cancelled { partial }) => {
                    let payload = DeepcountSnapshot::from(partial);
                    cb(DeepcountStatus::Cancelled, &payload, std::ptr::null(), user.get());
                }
                Err(err) => {
                    let msg = c_string_lossy(err.to_string());
                    cb(DeepcountStatus::Error, std::ptr::null(), msg.as_ptr(), user.get());
                }
            }
        });

    match result {
        Ok(_) => DeepcountStatus::Ok,
        Err(Error::AlreadyStarted) => {
            set_last_error("job has already been started");
            DeepcountStatus::AlreadyStarted
        }
        Err(e) => {
            set_last_error(e.to_string());
            DeepcountStatus::Error
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn deepcount_job_cancel(job: *mut DeepcountJob) {
    ok_last_error();
    if job.is_null() {
        return;
    }
    (*job).job.cancel();
}

#[no_mangle]
pub unsafe extern "C" fn deepcount_job_state(job: *mut DeepcountJob) -> DeepcountJobState {
    ok_last_error();
    if job.is_null() {
        set_last_error("job is null");
        return DeepcountJobState::Failed;
    }
    (*job).job.state().into()
}

unsafe fn c_path(ptr: *const c_char) -> Result<PathBuf, String> {
    let s = CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| "string is not valid UTF-8".to_string())?;
    if s.is_empty() {
        return Err("string is empty".to_string());
    }
    Ok(PathBuf::from(s))
}

fn c_string_lossy(msg: String) -> CString {
    CString::new(msg.replace('\0', " ")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Collected {
        progress_calls: usize,
        done: Option<(DeepcountStatus, Option<DeepcountSnapshot>, Option<String>)>,
    }

    extern "C" fn on_progress(_snapshot: *const DeepcountSnapshot, user_data: *mut libc::c_void) {
        let collected = unsafe { &mut *(user_data as *mut Collected) };
        collected.progress_calls += 1;
    }

    extern "C" fn on_done(
        status: DeepcountStatus,
        snapshot: *const DeepcountSnapshot,
        error_message: *const c_char,
        user_data: *mut libc::c_void,
    ) {
        let collected = unsafe { &mut *(user_data as *mut Collected) };
        let snapshot = unsafe { snapshot.as_ref().copied() };
        let message = unsafe { c_string_opt(error_message) };
        collected.done = Some((status, snapshot, message));
    }

    unsafe fn c_string_opt(ptr: *const c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        CStr::from_ptr(ptr).to_str().ok().map(str::to_owned)
    }

    unsafe fn run_to_completion(paths: &[CString]) -> Collected {
        let ptrs: Vec<*const c_char> = paths.iter().map(|p| p.as_ptr()).collect();
        let job = deepcount_job_new(ptrs.as_ptr(), ptrs.len(), false);
        assert!(!job.is_null());
        let runner = deepcount_runner_new();
        let context = deepcount_context_new();

        let collected: *mut Collected = Box::into_raw(Box::default());
        let user = collected as *mut libc::c_void;
        assert_eq!(
            deepcount_job_set_progress_callback(job, Some(on_progress), user),
            DeepcountStatus::Ok
        );
        assert_eq!(
            deepcount_job_run(job, runner, context, Some(on_done), user),
            DeepcountStatus::Ok
        );
        assert_eq!(
            deepcount_job_run(job, runner, context, Some(on_done), user),
            DeepcountStatus::AlreadyStarted
        );

        let deadline = Instant::now() + Duration::from_secs(10);
        while (*collected).done.is_none() && Instant::now() < deadline {
            if !deepcount_context_iteration(context, false) {
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        deepcount_job_free(job);
        deepcount_context_free(context);
        deepcount_runner_free(runner);
        *Box::from_raw(collected)
    }

    #[test]
    fn counts_a_directory_through_the_c_api() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), [0u8; 10]).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b").join("c"), [0u8; 20]).unwrap();

        let path = CString::new(dir.path().to_str().unwrap()).unwrap();
        let collected = unsafe { run_to_completion(&[path]) };

        let (status, snapshot, message) = collected.done.unwrap();
        assert_eq!(status, DeepcountStatus::Ok);
        assert_eq!(message, None);
        assert_eq!(
            snapshot,
            Some(DeepcountSnapshot {
                total_size: 30,
                file_count: 2,
                directory_count: 2,
                unreadable_directory_count: 0,
            })
        );
        assert!(collected.progress_calls >= 1);
    }

    #[test]
    fn missing_root_reports_an_error_message() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let path = CString::new(missing.to_str().unwrap()).unwrap();
        let collected = unsafe { run_to_completion(&[path]) };

        let (status, snapshot, message) = collected.done.unwrap();
        assert_eq!(status, DeepcountStatus::Error);
        assert_eq!(snapshot, None);
        assert!(message.unwrap().contains("missing"));
    }

    #[test]
    fn empty_path_list_is_rejected() {
        let job = unsafe { deepcount_job_new(std::ptr::null(), 0, false) };
        assert!(job.is_null());
        let msg = unsafe { c_string_opt(deepcount_last_error_message()) };
        assert!(msg.is_some());
    }

    #[test]
    fn version_matches_abi_constants() {
        assert_eq!(deepcount_ffi_version().major, FFI_ABI_MAJOR);
    }
}
