//! The three role-scoped portals and their navigation catalogs.
//!
//! Portal comparison is exact-match over a closed enumeration; an unknown or
//! missing role is treated as denial, never as a default grant.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::AppError;

/// Public landing page every denied navigation falls back to.
pub const LANDING_PAGE: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Portal {
    Student,
    Faculty,
    Admin,
}

impl Portal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Portal::Student => "student",
            Portal::Faculty => "faculty",
            Portal::Admin => "admin",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Portal::Student => "Student Portal",
            Portal::Faculty => "Faculty Portal",
            Portal::Admin => "Admin Portal",
        }
    }

    /// Auth page an unauthenticated navigation is redirected to.
    pub fn auth_path(&self) -> String {
        format!("/auth/{}", self.as_str())
    }

    /// Root of the portal's protected content region.
    pub fn dashboard_path(&self) -> String {
        format!("/portal/{}", self.as_str())
    }
}

impl Display for Portal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Portal {
    type Err = AppError;

    // Case-sensitive on purpose: role tags are persisted lowercase and an
    // unrecognised tag must deny, not normalise.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Portal::Student),
            "faculty" => Ok(Portal::Faculty),
            "admin" => Ok(Portal::Admin),
            other => Err(AppError::user(
                "unknown_portal".to_string(),
                format!("unknown portal: {other}"),
            )),
        }
    }
}

/// One navigation entry in a portal's dashboard shell.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NavLink {
    pub label: &'static str,
    pub path: &'static str,
}

const STUDENT_NAV: &[NavLink] = &[
    NavLink { label: "Dashboard", path: "/portal/student" },
    NavLink { label: "Attendance", path: "/portal/student/attendance" },
    NavLink { label: "Assignments", path: "/portal/student/assignments" },
    NavLink { label: "Notices", path: "/portal/student/notices" },
    NavLink { label: "Events", path: "/portal/student/events" },
    NavLink { label: "Timetable", path: "/portal/student/timetable" },
    NavLink { label: "Performance", path: "/portal/student/performance" },
];

const FACULTY_NAV: &[NavLink] = &[
    NavLink { label: "Dashboard", path: "/portal/faculty" },
    NavLink { label: "Assignments", path: "/portal/faculty/assignments" },
    NavLink { label: "Notices", path: "/portal/faculty/notices" },
    NavLink { label: "Complaints", path: "/portal/faculty/complaints" },
    NavLink { label: "Updates", path: "/portal/faculty/updates" },
];

const ADMIN_NAV: &[NavLink] = &[
    NavLink { label: "Dashboard", path: "/portal/admin" },
    NavLink { label: "Students", path: "/portal/admin/students" },
    NavLink { label: "Attendance", path: "/portal/admin/attendance" },
    NavLink { label: "Notices", path: "/portal/admin/notices" },
    NavLink { label: "Events", path: "/portal/admin/events" },
    NavLink { label: "Complaints", path: "/portal/admin/complaints" },
];

/// Navigation links scoped to the given portal.
pub fn nav_links(portal: Portal) -> &'static [NavLink] {
    match portal {
        Portal::Student => STUDENT_NAV,
        Portal::Faculty => FACULTY_NAV,
        Portal::Admin => ADMIN_NAV,
    }
}

/// True when `page` names a content region reachable from the portal's navigation.
pub fn is_nav_page(portal: Portal, page: &str) -> bool {
    let prefix = portal.dashboard_path();
    nav_links(portal)
        .iter()
        .filter_map(|l| l.path.strip_prefix(prefix.as_str()))
        .any(|rest| rest.strip_prefix('/').unwrap_or(rest) == page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_exact_and_case_sensitive() {
        assert_eq!("student".parse::<Portal>().unwrap(), Portal::Student);
        assert_eq!("faculty".parse::<Portal>().unwrap(), Portal::Faculty);
        assert_eq!("admin".parse::<Portal>().unwrap(), Portal::Admin);
        assert!("Student".parse::<Portal>().is_err());
        assert!("ADMIN".parse::<Portal>().is_err());
        assert!("registrar".parse::<Portal>().is_err());
        assert!("".parse::<Portal>().is_err());
    }

    #[test]
    fn paths_and_nav_catalogs() {
        assert_eq!(Portal::Student.auth_path(), "/auth/student");
        assert_eq!(Portal::Admin.dashboard_path(), "/portal/admin");
        for p in [Portal::Student, Portal::Faculty, Portal::Admin] {
            let nav = nav_links(p);
            assert!(!nav.is_empty());
            assert_eq!(nav[0].path, p.dashboard_path());
        }
    }

    #[test]
    fn nav_page_lookup() {
        assert!(is_nav_page(Portal::Student, "attendance"));
        assert!(is_nav_page(Portal::Faculty, "updates"));
        assert!(!is_nav_page(Portal::Faculty, "timetable"));
        assert!(!is_nav_page(Portal::Admin, "payroll"));
    }
}
