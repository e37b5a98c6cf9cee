use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const MIN_POLL_SECS: f32 = 0.05;
const MAX_POLL_SECS: f32 = 3_600.0;
const FALLBACK_POLL_SECS: f32 = 1.0;

/// Clamps a configured poll interval into a usable range. Non-finite values fall back to one second.
pub fn poll_interval(secs: f32) -> Duration {
    if !secs.is_finite() {
        log::warn!("[hot-reload] poll interval {secs} is not a number of seconds; using {FALLBACK_POLL_SECS}s");
        return Duration::from_secs_f32(FALLBACK_POLL_SECS);
    }
    Duration::try_from_secs_f32(secs.clamp(MIN_POLL_SECS, MAX_POLL_SECS))
        .unwrap_or_else(|_| Duration::from_secs_f32(FALLBACK_POLL_SECS))
}

/// "Reload now" request shared with the watcher thread. Only the flag crosses threads.
#[derive(Debug, Clone, Default)]
pub struct ReloadFlag(Arc<AtomicBool>);

impl ReloadFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the request, returning whether one was pending.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Polls the assembly directory on a background thread and raises the reload flag when a script
/// source changes.
pub struct AssemblyWatcher {
    _watcher: PollWatcher,
    root: PathBuf,
}

impl AssemblyWatcher {
    pub fn new(root: impl AsRef<Path>, poll_interval_secs: f32, flag: ReloadFlag) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            anyhow::bail!("path '{}' does not exist", root.display());
        }
        let interval = poll_interval(poll_interval_secs);
        let config = NotifyConfig::default().with_compare_contents(false).with_poll_interval(interval);
        let mut watcher = PollWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if Self::is_relevant(&event) {
                        flag.request();
                    }
                }
                Err(err) => log::warn!("[hot-reload] assembly watcher error: {err}"),
            },
            config,
        )
        .context("create assembly watcher")?;
        watcher.watch(root, RecursiveMode::Recursive).with_context(|| format!("watch {}", root.display()))?;
        log::info!("[hot-reload] watching {} every {:.2}s", root.display(), interval.as_secs_f32());
        Ok(Self { _watcher: watcher, root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_relevant(event: &Event) -> bool {
        let kind_matches = matches!(
            event.kind,
            EventKind::Modify(ModifyKind::Data(_))
                | EventKind::Modify(ModifyKind::Name(_))
                | EventKind::Modify(ModifyKind::Any)
                | EventKind::Create(_)
                | EventKind::Remove(_)
        );
        kind_matches && event.paths.iter().any(|path| is_script_source(path))
    }
}

pub fn is_script_source(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).map(|ext| ext.eq_ignore_ascii_case("rhai")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_take_clears_request() {
        let flag = ReloadFlag::new();
        let shared = flag.clone();
        assert!(!flag.take());
        shared.request();
        assert!(flag.is_requested());
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn only_rhai_sources_are_relevant() {
        let event = Event::new(EventKind::Create(notify::event::CreateKind::File)).add_path(PathBuf::from("Game/Enemy.rhai"));
        assert!(AssemblyWatcher::is_relevant(&event));
        let other = Event::new(EventKind::Create(notify::event::CreateKind::File)).add_path(PathBuf::from("notes.txt"));
        assert!(!AssemblyWatcher::is_relevant(&other));
        assert!(!is_script_source(Path::new("Game")));
    }

    #[test]
    fn poll_interval_is_clamped() {
        assert_eq!(poll_interval(0.0), Duration::from_secs_f32(MIN_POLL_SECS));
        assert_eq!(poll_interval(2.0), Duration::from_secs(2));
        assert_eq!(poll_interval(1e30), Duration::from_secs_f32(MAX_POLL_SECS));
        assert_eq!(poll_interval(f32::INFINITY), Duration::from_secs(1));
        assert_eq!(poll_interval(f32::NAN), Duration::from_secs(1));
        assert_eq!(poll_interval(-3.0), Duration::from_secs_f32(MIN_POLL_SECS));
    }

    #[test]
    fn missing_root_is_rejected() {
        assert!(AssemblyWatcher::new("does/not/exist", 1.0, ReloadFlag::new()).is_err());
    }
}
