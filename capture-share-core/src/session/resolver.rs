//! Target resolution against backend enumeration snapshots.
//!
//! Resolution happens before any backend start call, so a bad request can
//! never disturb an in-flight capture.

use crate::models::error::CaptureError;
use crate::models::target::{AppInfo, AppSelector, CaptureTarget, DisplayInfo, WindowInfo};

/// Resolve one application selector against an enumeration snapshot.
///
/// Match priority for name selectors: exact name, then bundle-id
/// substring, then name substring, then pid parsed from the string. The
/// tier decides, never the candidate order within a tier.
pub(crate) fn resolve_app(apps: &[AppInfo], selector: &AppSelector) -> Option<AppInfo> {
    match selector {
        AppSelector::Pid(pid) => apps.iter().find(|a| a.pid == *pid).cloned(),
        AppSelector::BundleId(needle) => {
            let needle = needle.to_lowercase();
            apps.iter()
                .find(|a| {
                    a.bundle_id
                        .as_ref()
                        .is_some_and(|b| b.to_lowercase().contains(&needle))
                })
                .cloned()
        }
        AppSelector::Name(name) => {
            if let Some(app) = apps.iter().find(|a| a.name == *name) {
                return Some(app.clone());
            }
            let needle = name.to_lowercase();
            if let Some(app) = apps.iter().find(|a| {
                a.bundle_id
                    .as_ref()
                    .is_some_and(|b| b.to_lowercase().contains(&needle))
            }) {
                return Some(app.clone());
            }
            if let Some(app) = apps
                .iter()
                .find(|a| a.name.to_lowercase().contains(&needle))
            {
                return Some(app.clone());
            }
            name.parse::<u32>()
                .ok()
                .and_then(|pid| apps.iter().find(|a| a.pid == pid).cloned())
        }
    }
}

fn available_names(apps: &[AppInfo]) -> Vec<String> {
    apps.iter().map(|a| a.name.clone()).collect()
}

/// An empty application enumeration is a permission problem, not an empty
/// result: a healthy system always has visible applications.
fn snapshot_or_permission_denied(apps: Vec<AppInfo>) -> Result<Vec<AppInfo>, CaptureError> {
    if apps.is_empty() {
        Err(CaptureError::PermissionDenied)
    } else {
        Ok(apps)
    }
}

pub(crate) fn resolve_application(
    apps: Vec<AppInfo>,
    selector: &AppSelector,
) -> Result<CaptureTarget, CaptureError> {
    let apps = snapshot_or_permission_denied(apps)?;
    match resolve_app(&apps, selector) {
        Some(app) => Ok(CaptureTarget::application(app)),
        None => Err(match selector {
            AppSelector::Pid(pid) => CaptureError::ProcessNotFound { pid: *pid },
            _ => CaptureError::TargetNotFound {
                requested: selector.describe(),
                available: available_names(&apps),
            },
        }),
    }
}

pub(crate) fn resolve_applications(
    apps: Vec<AppInfo>,
    selectors: &[AppSelector],
) -> Result<CaptureTarget, CaptureError> {
    if selectors.is_empty() {
        return Err(CaptureError::InvalidArgument(
            "application list must not be empty".into(),
        ));
    }
    let apps = snapshot_or_permission_denied(apps)?;

    let mut matched: Vec<AppInfo> = Vec::new();
    for selector in selectors {
        if let Some(app) = resolve_app(&apps, selector) {
            if !matched.iter().any(|m| m.pid == app.pid) {
                matched.push(app);
            }
        }
    }
    if matched.is_empty() {
        return Err(CaptureError::TargetNotFound {
            requested: selectors
                .iter()
                .map(AppSelector::describe)
                .collect::<Vec<_>>()
                .join(", "),
            available: available_names(&apps),
        });
    }
    Ok(CaptureTarget::applications(matched))
}

pub(crate) fn resolve_window(
    windows: Vec<WindowInfo>,
    window_id: u64,
) -> Result<CaptureTarget, CaptureError> {
    match windows.iter().find(|w| w.window_id == window_id) {
        Some(window) => Ok(CaptureTarget::window(window.clone())),
        None => Err(CaptureError::TargetNotFound {
            requested: format!("window {window_id}"),
            available: windows.into_iter().map(|w| w.title).collect(),
        }),
    }
}

pub(crate) fn resolve_display(
    displays: Vec<DisplayInfo>,
    display_id: u32,
) -> Result<CaptureTarget, CaptureError> {
    match displays.iter().find(|d| d.display_id == display_id) {
        Some(display) => Ok(CaptureTarget::display(*display)),
        None => Err(CaptureError::TargetNotFound {
            requested: format!("display {display_id}"),
            available: displays
                .into_iter()
                .map(|d| format!("display {}", d.display_id))
                .collect(),
        }),
    }
}
