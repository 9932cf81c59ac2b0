//! Auth gate integration tests: signup, login, and the per-navigation
//! session check, exercised across both role store backends.

use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use campusgate::identity::{
    AuthGate, Decision, IdentityProvider, LocalIdentityProvider, RecordPatch, RoleBackend,
    RoleStore, SessionManager,
};
use campusgate::portal::{Portal, LANDING_PAGE};

fn gate_for(root: &Path, backend: RoleBackend) -> (AuthGate, Arc<dyn RoleStore>) {
    let provider = Arc::new(LocalIdentityProvider::new(root));
    let roles = backend.open(root);
    let gate = AuthGate::new(provider, roles.clone(), SessionManager::default());
    (gate, roles)
}

fn for_each_backend(run: impl Fn(AuthGate, Arc<dyn RoleStore>)) {
    for backend in [RoleBackend::Table, RoleBackend::Document] {
        let tmp = tempdir().unwrap();
        let (gate, roles) = gate_for(tmp.path(), backend);
        run(gate, roles);
    }
}

#[test]
fn signup_then_login_on_same_portal_reaches_dashboard() {
    for_each_backend(|gate, _roles| {
        gate.sign_up("alice@example.com", "secret1", "Alice", Portal::Student).unwrap();
        let (session, profile) = gate
            .sign_in("alice@example.com", "secret1", Portal::Student)
            .expect("student login should succeed");
        assert_eq!(profile.role, Portal::Student);
        assert_eq!(profile.full_name, "Alice");

        match gate.check_session(Some(&session.token), Portal::Student).unwrap() {
            Decision::Allow(p) => assert_eq!(p.email, "alice@example.com"),
            other => panic!("expected Allow, got {:?}", other),
        }
    });
}

#[test]
fn cross_portal_login_denies_and_leaves_no_session() {
    for_each_backend(|gate, _roles| {
        gate.sign_up("alice@example.com", "secret1", "Alice", Portal::Student).unwrap();

        // A legitimate student session exists before the admin attempt.
        let (student_session, _) =
            gate.sign_in("alice@example.com", "secret1", Portal::Student).unwrap();

        let denied = gate.sign_in("alice@example.com", "secret1", Portal::Admin);
        assert!(denied.is_err(), "admin login with a student role must fail");

        // Forced sign-out: no session of the identity survives the mismatch.
        assert_eq!(gate.check_session(Some(&student_session.token), Portal::Student).unwrap(),
            Decision::Redirect { target: Portal::Student.auth_path() });
    });
}

#[test]
fn signup_role_follows_the_portal_of_the_form() {
    for_each_backend(|gate, _roles| {
        let identity = gate
            .sign_up("prof@example.com", "secret1", "Prof. Verma", Portal::Faculty)
            .unwrap();
        let (_, profile) = gate.sign_in("prof@example.com", "secret1", Portal::Faculty).unwrap();
        assert_eq!(profile.user_id, identity.id);
        assert_eq!(profile.role, Portal::Faculty);

        assert!(gate.sign_in("prof@example.com", "secret1", Portal::Student).is_err());
        assert!(gate.sign_in("prof@example.com", "secret1", Portal::Admin).is_err());
    });
}

#[test]
fn first_login_without_record_completes_with_portal_role() {
    for backend in [RoleBackend::Table, RoleBackend::Document] {
        let tmp = tempdir().unwrap();
        let (gate, roles) = gate_for(tmp.path(), backend);
        // The account exists at the identity provider but no role record
        // was ever written (an interrupted signup). The accounts table is
        // file-backed, so a second provider handle over the same root sees
        // the same accounts the gate does.
        let provider = LocalIdentityProvider::new(tmp.path());
        let identity = provider.create_account("bob@example.com", "secret1").unwrap();
        assert!(roles.read_record(identity.id).unwrap().is_none());

        let (_, profile) = gate.sign_in("bob@example.com", "secret1", Portal::Faculty).unwrap();
        assert_eq!(profile.role, Portal::Faculty);
        // Display name defaults to the email local part.
        assert_eq!(profile.full_name, "bob");

        let rec = roles.read_record(identity.id).unwrap().expect("record created on first login");
        assert_eq!(rec.role, Portal::Faculty);
    }
}

#[test]
fn empty_signup_name_defaults_to_email_local_part() {
    for_each_backend(|gate, roles| {
        let identity = gate.sign_up("rao@example.com", "secret1", "  ", Portal::Student).unwrap();
        let rec = roles.read_record(identity.id).unwrap().unwrap();
        assert_eq!(rec.full_name, "rao");
    });
}

#[test]
fn expired_or_absent_token_redirects_to_auth_page() {
    for_each_backend(|gate, _roles| {
        assert_eq!(
            gate.check_session(None, Portal::Admin).unwrap(),
            Decision::Redirect { target: Portal::Admin.auth_path() }
        );
        assert_eq!(
            gate.check_session(Some("not-a-token"), Portal::Faculty).unwrap(),
            Decision::Redirect { target: Portal::Faculty.auth_path() }
        );
    });
}

#[test]
fn navigating_to_wrong_portal_denies_and_ends_session() {
    for_each_backend(|gate, _roles| {
        gate.sign_up("alice@example.com", "secret1", "Alice", Portal::Student).unwrap();
        let (session, _) = gate.sign_in("alice@example.com", "secret1", Portal::Student).unwrap();

        match gate.check_session(Some(&session.token), Portal::Admin).unwrap() {
            Decision::Deny { target, notice } => {
                assert_eq!(target, LANDING_PAGE);
                assert!(notice.contains("Admin Portal"));
            }
            other => panic!("expected Deny, got {:?}", other),
        }

        // The session was terminated as a corrective side effect, so even
        // the matching portal no longer admits it.
        assert_eq!(
            gate.check_session(Some(&session.token), Portal::Student).unwrap(),
            Decision::Redirect { target: Portal::Student.auth_path() }
        );
    });
}

#[test]
fn placeholder_display_name_is_backfilled_on_check() {
    for_each_backend(|gate, roles| {
        let identity = gate
            .sign_up("carol@example.com", "secret1", "Carol", Portal::Admin)
            .unwrap();
        // Reset the stored name to the legacy signup placeholder.
        roles
            .update_record(identity.id, RecordPatch { full_name: Some("New User".into()), department: None })
            .unwrap();

        let (session, _) = gate.sign_in("carol@example.com", "secret1", Portal::Admin).unwrap();
        match gate.check_session(Some(&session.token), Portal::Admin).unwrap() {
            Decision::Allow(profile) => assert_eq!(profile.full_name, "carol"),
            other => panic!("expected Allow, got {:?}", other),
        }
        // Only the name was rewritten.
        let rec = roles.read_record(identity.id).unwrap().unwrap();
        assert_eq!(rec.full_name, "carol");
        assert_eq!(rec.role, Portal::Admin);
        assert_eq!(rec.email, "carol@example.com");
    });
}

#[test]
fn spec_example_alice_student_then_admin_attempt() {
    for_each_backend(|gate, roles| {
        let identity = gate
            .sign_up("alice@example.com", "secret1", "Alice", Portal::Student)
            .unwrap();
        let rec = roles.read_record(identity.id).unwrap().unwrap();
        assert_eq!(rec.role, Portal::Student);

        let denied = gate.sign_in("alice@example.com", "secret1", Portal::Admin);
        assert!(denied.is_err());
        // No session exists; a subsequent admin navigation redirects home.
        assert_eq!(
            gate.check_session(None, Portal::Admin).unwrap(),
            Decision::Redirect { target: Portal::Admin.auth_path() }
        );
    });
}

/// Rewrite the persisted role tag to a value outside the closed enumeration,
/// bypassing the store API the way external tampering would.
fn corrupt_role_tag(root: &Path, backend: RoleBackend, id: uuid::Uuid) {
    match backend {
        RoleBackend::Document => {
            let path = root.join("role_records").join(format!("{id}.json"));
            let mut doc: serde_json::Value =
                serde_json::from_reader(std::fs::File::open(&path).unwrap()).unwrap();
            doc["role"] = serde_json::Value::String("registrar".into());
            serde_json::to_writer_pretty(std::fs::File::create(&path).unwrap(), &doc).unwrap();
        }
        RoleBackend::Table => {
            use polars::prelude::*;
            let path = root.join("role_records.parquet");
            let mut df = ParquetReader::new(std::fs::File::open(&path).unwrap()).finish().unwrap();
            let n = df.height();
            df.with_column(Series::new("role".into(), vec!["registrar".to_string(); n])).unwrap();
            let mut f = std::fs::File::create(&path).unwrap();
            ParquetWriter::new(&mut f).finish(&mut df).unwrap();
        }
    }
}

#[test]
fn unknown_persisted_role_tag_denies_and_ends_session() {
    for backend in [RoleBackend::Table, RoleBackend::Document] {
        let tmp = tempdir().unwrap();
        let (gate, _roles) = gate_for(tmp.path(), backend);
        let identity = gate
            .sign_up("alice@example.com", "secret1", "Alice", Portal::Student)
            .unwrap();
        let (session, _) = gate.sign_in("alice@example.com", "secret1", Portal::Student).unwrap();

        corrupt_role_tag(tmp.path(), backend, identity.id);

        // An unrecognised tag is a denial, never a default grant, on both
        // backends alike.
        match gate.check_session(Some(&session.token), Portal::Student).unwrap() {
            Decision::Deny { target, .. } => assert_eq!(target, LANDING_PAGE),
            other => panic!("expected Deny, got {:?}", other),
        }
        // The session was terminated as a corrective side effect.
        assert_eq!(
            gate.check_session(Some(&session.token), Portal::Student).unwrap(),
            Decision::Redirect { target: Portal::Student.auth_path() }
        );
        // Login is denied too, for every portal.
        assert!(gate.sign_in("alice@example.com", "secret1", Portal::Student).is_err());
        assert!(gate.sign_in("alice@example.com", "secret1", Portal::Admin).is_err());
    }
}

#[test]
fn duplicate_signup_is_reported_once_not_retried() {
    for_each_backend(|gate, _roles| {
        gate.sign_up("dan@example.com", "secret1", "Dan", Portal::Faculty).unwrap();
        let dup = gate.sign_up("dan@example.com", "secret2", "Dan Again", Portal::Admin);
        assert!(dup.is_err(), "duplicate email must be rejected");
        // The original faculty role is untouched by the failed admin signup.
        let (_, profile) = gate.sign_in("dan@example.com", "secret1", Portal::Faculty).unwrap();
        assert_eq!(profile.role, Portal::Faculty);
    });
}

#[test]
fn provider_accounts_and_role_records_stay_one_to_one() {
    let tmp = tempdir().unwrap();
    let provider = LocalIdentityProvider::new(tmp.path());
    let (gate, roles) = gate_for(tmp.path(), RoleBackend::Table);

    let identity = gate.sign_up("eve@example.com", "secret1", "Eve", Portal::Student).unwrap();
    // Re-authentication through a separate provider handle resolves to the
    // same identity id, so the role lookup stays keyed to one record.
    let back = provider.authenticate("eve@example.com", "secret1").unwrap();
    assert_eq!(back.id, identity.id);
    assert!(roles.read_record(back.id).unwrap().is_some());
}
