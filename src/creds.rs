use std::ffi::CString;

use crate::error::{syscall_error, DaemonError, DaemonResult};

/// Account the daemon falls back to when neither an explicit account nor
/// one matching the daemon name exists.
pub const FALLBACK_ACCOUNT: &str = "daemon";

/// A (uid, gid) pair used once to transition the process identity.
/// Computed fresh on every start, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credential {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
}

/// Account-database collaborator. Absence of an account is `None`, not an
/// error; the resolution chain decides what absence means.
pub trait AccountLookup {
    fn user_id(&self, name: &str) -> Option<libc::uid_t>;
    fn group_id(&self, name: &str) -> Option<libc::gid_t>;
}

/// The real OS account database, via getpwnam/getgrnam.
#[derive(Debug, Default)]
pub struct SystemAccounts;

impl AccountLookup for SystemAccounts {
    fn user_id(&self, name: &str) -> Option<libc::uid_t> {
        let cname = CString::new(name).ok()?;
        let pwd = unsafe { libc::getpwnam(cname.as_ptr()) };
        if pwd.is_null() {
            None
        } else {
            Some(unsafe { (*pwd).pw_uid })
        }
    }

    fn group_id(&self, name: &str) -> Option<libc::gid_t> {
        let cname = CString::new(name).ok()?;
        let grp = unsafe { libc::getgrnam(cname.as_ptr()) };
        if grp.is_null() {
            None
        } else {
            Some(unsafe { (*grp).gr_gid })
        }
    }
}

/// Resolves the identity the daemon drops to.
///
/// Candidates are tried in order: the explicit account, the daemon name,
/// then the `daemon` fallback; the first existing account wins. User and
/// group resolve independently through the same chain. When not even the
/// fallback exists there is no identity to drop to, which is a fatal
/// configuration error.
pub fn resolve<L: AccountLookup>(
    lookup: &L,
    name: &str,
    user: Option<&str>,
    group: Option<&str>,
) -> DaemonResult<Credential> {
    let uid = first_of(&[user, Some(name), Some(FALLBACK_ACCOUNT)], |n| lookup.user_id(n))
        .ok_or_else(|| {
            DaemonError::Credential(format!(
                "no resolvable user among {:?}, '{}', '{}'",
                user, name, FALLBACK_ACCOUNT
            ))
        })?;
    let gid = first_of(&[group, Some(name), Some(FALLBACK_ACCOUNT)], |n| lookup.group_id(n))
        .ok_or_else(|| {
            DaemonError::Credential(format!(
                "no resolvable group among {:?}, '{}', '{}'",
                group, name, FALLBACK_ACCOUNT
            ))
        })?;
    Ok(Credential { uid, gid })
}

fn first_of<T>(candidates: &[Option<&str>], f: impl Fn(&str) -> Option<T>) -> Option<T> {
    candidates.iter().flatten().find_map(|name| f(name))
}

/// Switches the effective identity to `cred`.
///
/// Group before user: once the user id changes the process may no longer
/// hold the permission needed to change its group id.
pub fn apply(cred: &Credential) -> DaemonResult<()> {
    if unsafe { libc::setgid(cred.gid) } < 0 {
        return Err(syscall_error("setgid"));
    }
    if unsafe { libc::setuid(cred.uid) } < 0 {
        return Err(syscall_error("setuid"));
    }
    Ok(())
}

/// Resolves and applies the drop target in one step.
pub fn drop_privileges<L: AccountLookup>(
    lookup: &L,
    name: &str,
    user: Option<&str>,
    group: Option<&str>,
) -> DaemonResult<()> {
    apply(&resolve(lookup, name, user, group)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeAccounts {
        users: HashMap<&'static str, libc::uid_t>,
        groups: HashMap<&'static str, libc::gid_t>,
    }

    impl FakeAccounts {
        fn with(users: &[(&'static str, u32)], groups: &[(&'static str, u32)]) -> Self {
            FakeAccounts {
                users: users.iter().copied().collect(),
                groups: groups.iter().copied().collect(),
            }
        }
    }

    impl AccountLookup for FakeAccounts {
        fn user_id(&self, name: &str) -> Option<libc::uid_t> {
            self.users.get(name).copied()
        }
        fn group_id(&self, name: &str) -> Option<libc::gid_t> {
            self.groups.get(name).copied()
        }
    }

    #[test]
    fn explicit_account_wins() {
        let accounts = FakeAccounts::with(
            &[("svc-user", 10), ("echoer", 20), ("daemon", 1)],
            &[("svc-group", 11), ("echoer", 21), ("daemon", 2)],
        );
        let cred =
            resolve(&accounts, "echoer", Some("svc-user"), Some("svc-group")).unwrap();
        assert_eq!(cred, Credential { uid: 10, gid: 11 });
    }

    #[test]
    fn daemon_name_is_tried_before_fallback() {
        let accounts =
            FakeAccounts::with(&[("echoer", 20), ("daemon", 1)], &[("echoer", 21), ("daemon", 2)]);
        let cred = resolve(&accounts, "echoer", None, None).unwrap();
        assert_eq!(cred, Credential { uid: 20, gid: 21 });
    }

    #[test]
    fn unknown_explicit_account_falls_through_the_chain() {
        let accounts = FakeAccounts::with(&[("daemon", 1)], &[("daemon", 2)]);
        let cred = resolve(&accounts, "echoer", Some("ghost"), None).unwrap();
        assert_eq!(cred, Credential { uid: 1, gid: 2 });
    }

    #[test]
    fn user_and_group_resolve_independently() {
        let accounts =
            FakeAccounts::with(&[("echoer", 20), ("daemon", 1)], &[("daemon", 2)]);
        let cred = resolve(&accounts, "echoer", None, None).unwrap();
        assert_eq!(cred, Credential { uid: 20, gid: 2 });
    }

    #[test]
    fn missing_fallback_account_is_fatal() {
        let accounts = FakeAccounts::with(&[], &[("daemon", 2)]);
        match resolve(&accounts, "echoer", None, None) {
            Err(DaemonError::Credential(_)) => {}
            other => panic!("expected Credential error, got {:?}", other),
        }
    }
}
