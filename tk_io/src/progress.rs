use std::sync::Arc;

/// Events emitted while software is downloaded, extracted or copied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallProgress {
    DownloadStarted {
        name: String,
        total_bytes: u64,
        /// `total_bytes` is a guess because the server sent no length.
        estimated: bool,
    },
    DownloadProgress {
        name: String,
        downloaded: u64,
        total_bytes: u64,
    },
    DownloadCompleted {
        name: String,
        total_bytes: u64,
    },
    ExtractStarted {
        name: String,
    },
    ExtractCompleted {
        name: String,
    },
    CopyStarted {
        name: String,
        total_files: usize,
    },
    CopyProgress {
        name: String,
        copied: usize,
        total_files: usize,
    },
    CopyCompleted {
        name: String,
    },
    InstallCompleted {
        name: String,
    },
}

pub type ProgressCallback = Box<dyn Fn(InstallProgress) + Send + Sync>;

/// Send `event` to the callback when one is attached.
pub(crate) fn report(progress: &Option<Arc<ProgressCallback>>, event: InstallProgress) {
    if let Some(cb) = progress {
        cb(event);
    }
}

#[cfg(test)]
pub(crate) fn recording_callback() -> (
    Arc<ProgressCallback>,
    Arc<std::sync::Mutex<Vec<InstallProgress>>>,
) {
    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: Arc<ProgressCallback> = Arc::new(Box::new(move |event| {
        sink.lock().unwrap().push(event);
    }));
    (callback, events)
}
