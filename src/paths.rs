//! Where threadbox keeps its files.
//!
//! | kind        | location                                         |
//! |-------------|--------------------------------------------------|
//! | `Config`    | `$XDG_CONFIG_HOME/threadbox/config.toml`         |
//! | `State`     | `$XDG_DATA_HOME/threadbox/state.json`            |
//! | `LogDir`    | `$XDG_DATA_HOME/threadbox/`                      |
//! | `Worktrees` | `$XDG_DATA_HOME/threadbox/worktrees/`            |
//!
//! The XDG variables fall back to `~/.config` and `~/.local/share`. Dev
//! builds use `threadbox-dev` so they never touch an installed binary's data.
//!
//! Unit tests redirect every kind under one directory with `TestPathGuard`.
//! The override is thread-local.

#[cfg(test)]
use std::cell::RefCell;
use std::path::PathBuf;

fn app_dir_name() -> &'static str {
    if cfg!(dev_build) {
        "threadbox-dev"
    } else {
        "threadbox"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Config,
    State,
    LogDir,
    Worktrees,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Config,
    Data,
}

impl PathKind {
    fn root(self) -> Root {
        match self {
            PathKind::Config => Root::Config,
            PathKind::State | PathKind::LogDir | PathKind::Worktrees => Root::Data,
        }
    }

    /// Entry below the app directory, `None` for the directory itself.
    fn entry(self) -> Option<&'static str> {
        match self {
            PathKind::Config => Some("config.toml"),
            PathKind::State => Some("state.json"),
            PathKind::LogDir => None,
            PathKind::Worktrees => Some("worktrees"),
        }
    }
}

#[cfg(test)]
thread_local! {
    static OVERRIDE: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

#[cfg(test)]
fn override_base() -> Option<PathBuf> {
    OVERRIDE.with(|o| o.borrow().clone())
}

#[cfg(not(test))]
fn override_base() -> Option<PathBuf> {
    None
}

fn xdg_root(root: Root) -> Option<PathBuf> {
    let (var, fallback): (&str, &[&str]) = match root {
        Root::Config => ("XDG_CONFIG_HOME", &[".config"]),
        Root::Data => ("XDG_DATA_HOME", &[".local", "share"]),
    };
    if let Some(dir) = std::env::var_os(var).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir).join(app_dir_name()));
    }
    let mut dir = PathBuf::from(std::env::var_os("HOME")?);
    dir.extend(fallback);
    Some(dir.join(app_dir_name()))
}

/// Resolve `kind`. `None` when neither the XDG variable nor HOME is set.
pub fn resolve(kind: PathKind) -> Option<PathBuf> {
    let base = override_base().or_else(|| xdg_root(kind.root()))?;
    Some(match kind.entry() {
        Some(entry) => base.join(entry),
        None => base,
    })
}

pub fn config_file() -> Option<PathBuf> {
    resolve(PathKind::Config)
}

pub fn state_file() -> Option<PathBuf> {
    resolve(PathKind::State)
}

pub fn log_directory() -> Option<PathBuf> {
    resolve(PathKind::LogDir)
}

/// Default parent of new worktrees when `worktrees_base` is not configured.
pub fn worktrees_directory() -> Option<PathBuf> {
    resolve(PathKind::Worktrees)
}

/// Points every path kind under one directory until dropped, then restores
/// whatever was in effect before. Guards nest.
#[cfg(test)]
struct TestPathGuard {
    previous: Option<PathBuf>,
}

#[cfg(test)]
impl TestPathGuard {
    fn new(base_dir: impl Into<PathBuf>) -> Self {
        let previous = OVERRIDE.with(|o| o.replace(Some(base_dir.into())));
        Self { previous }
    }
}

#[cfg(test)]
impl Drop for TestPathGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        OVERRIDE.with(|o| *o.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_places_every_kind_under_base() {
        let _guard = TestPathGuard::new("/data");

        assert_eq!(config_file(), Some(PathBuf::from("/data/config.toml")));
        assert_eq!(state_file(), Some(PathBuf::from("/data/state.json")));
        assert_eq!(log_directory(), Some(PathBuf::from("/data")));
        assert_eq!(worktrees_directory(), Some(PathBuf::from("/data/worktrees")));
    }

    #[test]
    fn nested_guards_restore_outer_override() {
        let _outer = TestPathGuard::new("/outer");
        {
            let _inner = TestPathGuard::new("/inner");
            assert_eq!(state_file(), Some(PathBuf::from("/inner/state.json")));
        }
        assert_eq!(state_file(), Some(PathBuf::from("/outer/state.json")));
    }

    #[test]
    fn override_does_not_leak_across_threads() {
        let _guard = TestPathGuard::new("/only-here");
        let leaked = std::thread::spawn(|| OVERRIDE.with(|o| o.borrow().is_some()))
            .join()
            .unwrap();
        assert!(!leaked);
    }

    #[test]
    fn config_and_data_roots_differ() {
        assert_eq!(PathKind::Config.root(), Root::Config);
        for kind in [PathKind::State, PathKind::LogDir, PathKind::Worktrees] {
            assert_eq!(kind.root(), Root::Data);
        }
    }
}
