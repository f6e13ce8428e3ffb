use serde::{Deserialize, Serialize};

/// A running application visible to the capture backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub pid: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
}

/// A capturable window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub window_id: u64,
    pub title: String,
    pub owner_pid: u32,
}

/// A capturable display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub display_id: u32,
    pub width: u32,
    pub height: u32,
}

/// How a single application is identified by a caller.
///
/// Decoded once at the API boundary; the engine never sees raw
/// number-or-string identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppSelector {
    Pid(u32),
    Name(String),
    BundleId(String),
}

impl AppSelector {
    pub fn describe(&self) -> String {
        match self {
            Self::Pid(pid) => format!("pid {pid}"),
            Self::Name(name) => name.clone(),
            Self::BundleId(id) => id.clone(),
        }
    }
}

/// What to capture, as requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    Application(AppSelector),
    Window(u64),
    Display(u32),
    Applications(Vec<AppSelector>),
}

impl TargetSelector {
    pub fn describe(&self) -> String {
        match self {
            Self::Application(sel) => sel.describe(),
            Self::Window(id) => format!("window {id}"),
            Self::Display(id) => format!("display {id}"),
            Self::Applications(sels) => sels
                .iter()
                .map(AppSelector::describe)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Kind of resolved capture target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetKind {
    Application,
    Window,
    Display,
    MultiApplication,
}

/// Structural identity of a resolved target: kind plus native identifier(s).
///
/// Two start requests with equal fingerprints share one native capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetFingerprint {
    Application(u32),
    Window(u64),
    Display(u32),
    /// Sorted pid list, so member order never affects equality.
    MultiApplication(Vec<u32>),
}

/// A fully resolved capture target. Immutable once capture has started;
/// switching targets requires stopping the current capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureTarget {
    pub kind: TargetKind,
    /// Nullable for display-only targets.
    pub primary_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apps: Vec<AppInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayInfo>,
}

impl CaptureTarget {
    pub fn application(app: AppInfo) -> Self {
        Self {
            kind: TargetKind::Application,
            primary_pid: Some(app.pid),
            app: Some(app),
            apps: Vec::new(),
            window: None,
            display: None,
        }
    }

    pub fn applications(apps: Vec<AppInfo>) -> Self {
        Self {
            kind: TargetKind::MultiApplication,
            primary_pid: apps.first().map(|a| a.pid),
            app: None,
            apps,
            window: None,
            display: None,
        }
    }

    pub fn window(window: WindowInfo) -> Self {
        Self {
            kind: TargetKind::Window,
            primary_pid: Some(window.owner_pid),
            app: None,
            apps: Vec::new(),
            window: Some(window),
            display: None,
        }
    }

    pub fn display(display: DisplayInfo) -> Self {
        Self {
            kind: TargetKind::Display,
            primary_pid: None,
            app: None,
            apps: Vec::new(),
            window: None,
            display: Some(display),
        }
    }

    /// Structural identity used for join-vs-restart decisions.
    pub fn fingerprint(&self) -> TargetFingerprint {
        match self.kind {
            TargetKind::Application => {
                TargetFingerprint::Application(self.primary_pid.unwrap_or(0))
            }
            TargetKind::Window => {
                TargetFingerprint::Window(self.window.as_ref().map(|w| w.window_id).unwrap_or(0))
            }
            TargetKind::Display => {
                TargetFingerprint::Display(self.display.as_ref().map(|d| d.display_id).unwrap_or(0))
            }
            TargetKind::MultiApplication => {
                let mut pids: Vec<u32> = self.apps.iter().map(|a| a.pid).collect();
                pids.sort_unstable();
                pids.dedup();
                TargetFingerprint::MultiApplication(pids)
            }
        }
    }

    /// Process ids covered by this target (empty for displays).
    pub fn pids(&self) -> Vec<u32> {
        match self.kind {
            TargetKind::MultiApplication => self.apps.iter().map(|a| a.pid).collect(),
            _ => self.primary_pid.into_iter().collect(),
        }
    }

    pub fn describe(&self) -> String {
        match self.kind {
            TargetKind::Application => self
                .app
                .as_ref()
                .map(|a| format!("{} (pid {})", a.name, a.pid))
                .unwrap_or_else(|| "application".into()),
            TargetKind::Window => self
                .window
                .as_ref()
                .map(|w| format!("window {} ({})", w.window_id, w.title))
                .unwrap_or_else(|| "window".into()),
            TargetKind::Display => self
                .display
                .as_ref()
                .map(|d| format!("display {}", d.display_id))
                .unwrap_or_else(|| "display".into()),
            TargetKind::MultiApplication => {
                let names: Vec<&str> = self.apps.iter().map(|a| a.name.as_str()).collect();
                format!("applications [{}]", names.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(pid: u32, name: &str) -> AppInfo {
        AppInfo {
            pid,
            name: name.into(),
            bundle_id: None,
        }
    }

    #[test]
    fn application_fingerprints_compare_by_pid() {
        let a = CaptureTarget::application(app(100, "Example App"));
        let b = CaptureTarget::application(app(100, "Renamed App"));
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = CaptureTarget::application(app(200, "Example App"));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn multi_app_fingerprint_ignores_order_and_duplicates() {
        let a = CaptureTarget::applications(vec![app(1, "a"), app(2, "b")]);
        let b = CaptureTarget::applications(vec![app(2, "b"), app(1, "a"), app(1, "a")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn kinds_never_share_fingerprints() {
        let win = CaptureTarget::window(WindowInfo {
            window_id: 7,
            title: "t".into(),
            owner_pid: 7,
        });
        let display = CaptureTarget::display(DisplayInfo {
            display_id: 7,
            width: 1,
            height: 1,
        });
        let app7 = CaptureTarget::application(app(7, "x"));
        assert_ne!(win.fingerprint(), display.fingerprint());
        assert_ne!(win.fingerprint(), app7.fingerprint());
    }

    #[test]
    fn display_target_has_no_pid() {
        let display = CaptureTarget::display(DisplayInfo {
            display_id: 1,
            width: 1920,
            height: 1080,
        });
        assert_eq!(display.primary_pid, None);
        assert!(display.pids().is_empty());
    }
}
