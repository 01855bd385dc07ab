use std::cell::RefCell;
use std::rc::Rc;
use std::sync::OnceLock;

use postgres::{Client, NoTls};
use uuid::Uuid;

use nestedset_core::{DeletePolicy, NestedSet, NestedSetConfig, ScopeKey};
use nestedset_postgres::{ensure_schema, load_config, reset_scope_for_tests, save_config, PgStore};
use nestedset_test_support as support;

fn connect() -> Option<Rc<RefCell<Client>>> {
    let url = std::env::var("NESTEDSET_POSTGRES_URL").ok()?;
    let client = Client::connect(&url, NoTls).ok()?;
    Some(Rc::new(RefCell::new(client)))
}

fn ensure_schema_once(client: &Rc<RefCell<Client>>) {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        let mut c = client.borrow_mut();
        ensure_schema(&mut c).unwrap();
    });
}

/// Fresh store plus a scope no other test touches.
fn backend() -> Option<impl FnMut() -> (PgStore, ScopeKey)> {
    let client = connect()?;
    ensure_schema_once(&client);
    Some(move || {
        let scope = ScopeKey::new(format!("test-{}", Uuid::new_v4()));
        {
            let mut c = client.borrow_mut();
            reset_scope_for_tests(&mut c, scope.as_str()).unwrap();
        }
        (PgStore::new(client.clone()), scope)
    })
}

#[test]
fn postgres_inserts_and_queries() {
    let Some(open) = backend() else {
        return;
    };
    support::inserts_and_queries(open);
}

#[test]
fn postgres_moves_subtree_forward() {
    let Some(open) = backend() else {
        return;
    };
    support::moves_subtree_forward(open);
}

#[test]
fn postgres_reparents_and_reorders() {
    let Some(open) = backend() else {
        return;
    };
    support::reparents_and_reorders(open);
}

#[test]
fn postgres_failed_mutation_rolls_back() {
    let Some(open) = backend() else {
        return;
    };
    support::failed_mutation_rolls_back(open);
}

#[test]
fn postgres_deletes_per_policy() {
    let Some(open) = backend() else {
        return;
    };
    support::deletes_per_policy(open);
}

#[test]
fn postgres_deletes_a_leaf() {
    let Some(open) = backend() else {
        return;
    };
    support::deletes_a_leaf(open);
}

#[test]
fn postgres_audits_and_repairs() {
    let Some(open) = backend() else {
        return;
    };
    support::audits_and_repairs(open);
}

#[test]
fn postgres_fixes_a_subtree_and_resizes_its_root() {
    let Some(open) = backend() else {
        return;
    };
    support::fixes_a_subtree_and_resizes_its_root(open);
}

#[test]
fn postgres_rebuilds_from_items() {
    let Some(open) = backend() else {
        return;
    };
    support::rebuilds_from_items(open);
}

#[test]
fn postgres_scopes_are_isolated() {
    let Some(open) = backend() else {
        return;
    };
    support::scopes_are_isolated(open);
}

#[test]
fn postgres_config_round_trips_per_scope() {
    let Some(client) = connect() else {
        return;
    };
    ensure_schema_once(&client);
    let scope = format!("test-config-{}", Uuid::new_v4());
    {
        let mut c = client.borrow_mut();
        reset_scope_for_tests(&mut c, &scope).unwrap();
        assert_eq!(load_config(&mut c, &scope).unwrap(), NestedSetConfig::default());
        let config = NestedSetConfig::default().with_delete_policy(DeletePolicy::SoftRetainBounds);
        save_config(&mut c, &scope, &config).unwrap();
    }

    let config = load_config(&mut client.borrow_mut(), &scope).unwrap();
    assert_eq!(config.delete_policy, DeletePolicy::SoftRetainBounds);

    let scope = ScopeKey::new(scope);
    let mut tree = NestedSet::with_config(PgStore::new(client.clone()), config);
    let m = support::menu(&mut tree, &scope);
    tree.delete_subtree(&scope, m.fruit).unwrap();
    assert_eq!(support::bounds_of(&tree, &scope, m.veg), (8, 9, 1));
    tree.ensure_valid(&scope).unwrap();
}
