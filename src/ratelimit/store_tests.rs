use super::*;
use crate::ratelimit::resource::{APP_DEFAULT_RESOURCE, NODE_RESOURCE, SERVICE_DEFAULT_RESOURCE};

fn def(id: i64, resource_type: ResourceType) -> RateLimitDef {
    RateLimitDef {
        id,
        resource_type,
        is_deleted: false,
        enable: true,
        resource: None,
        app: None,
        ip: None,
        service: None,
        path: None,
        qps: 100,
        concurrents: 10,
        response_type: None,
        response_content: None,
    }
}

fn request_key(app: Option<&str>, service: &str, path: &str) -> ResourceKey {
    ResourceKey::new(app, Some("10.0.0.1"), None, Some(service), Some(path)).unwrap()
}

#[test]
fn test_type_forces_scope_marker() {
    let node = ResourceRateLimitConfig::from_def(&def(1, ResourceType::Node)).unwrap();
    assert_eq!(node.resource_id(), NODE_RESOURCE);

    let sd = ResourceRateLimitConfig::from_def(&def(2, ResourceType::ServiceDefault)).unwrap();
    assert_eq!(sd.resource_id(), SERVICE_DEFAULT_RESOURCE);

    let ad = ResourceRateLimitConfig::from_def(&def(3, ResourceType::AppDefault)).unwrap();
    assert_eq!(ad.resource_id(), APP_DEFAULT_RESOURCE);
}

#[test]
fn test_legacy_resource_field_is_service() {
    let cfg = ResourceRateLimitConfig::from_def(&RateLimitDef {
        resource: Some("order".to_string()),
        ..def(1, ResourceType::Service)
    })
    .unwrap();
    assert_eq!(cfg.resource_id(), "^^^order^");

    let cfg = ResourceRateLimitConfig::from_def(&RateLimitDef {
        resource: Some("_global".to_string()),
        ..def(2, ResourceType::Node)
    })
    .unwrap();
    assert_eq!(cfg.resource_id(), NODE_RESOURCE);
}

#[test]
fn test_app_service_entry() {
    let store = ResourceRateLimitStore::new();
    store
        .upsert(&RateLimitDef {
            app: Some("xapp".to_string()),
            service: Some("yservice".to_string()),
            concurrents: 88,
            ..def(3, ResourceType::App)
        })
        .unwrap();
    let cfg = store.get("xapp^^^yservice^").unwrap();
    assert_eq!(cfg.concurrents, 88);
}

#[test]
fn test_deleted_and_disabled_are_not_stored() {
    let store = ResourceRateLimitStore::new();
    store
        .upsert(&RateLimitDef {
            is_deleted: true,
            ..def(1, ResourceType::Node)
        })
        .unwrap();
    store
        .upsert(&RateLimitDef {
            enable: false,
            ..def(2, ResourceType::ServiceDefault)
        })
        .unwrap();
    assert!(store.is_empty());
}

#[test]
fn test_upsert_moves_resource_id() {
    let store = ResourceRateLimitStore::new();
    store
        .upsert(&RateLimitDef {
            service: Some("a".to_string()),
            ..def(1, ResourceType::Service)
        })
        .unwrap();
    store
        .upsert(&RateLimitDef {
            service: Some("b".to_string()),
            ..def(1, ResourceType::Service)
        })
        .unwrap();
    assert!(store.get("^^^a^").is_none());
    assert!(store.get("^^^b^").is_some());
    assert_eq!(store.len(), 1);

    store.remove(1);
    assert!(store.is_empty());
}

#[test]
fn test_disabling_existing_entry_removes_it() {
    let store = ResourceRateLimitStore::new();
    store.upsert(&def(1, ResourceType::Node)).unwrap();
    assert_eq!(store.len(), 1);
    store
        .upsert(&RateLimitDef {
            enable: false,
            ..def(1, ResourceType::Node)
        })
        .unwrap();
    assert!(store.get(NODE_RESOURCE).is_none());
}

#[test]
fn test_resolve_falls_back_through_scopes() {
    let store = ResourceRateLimitStore::from_defs(&[
        RateLimitDef {
            qps: 1,
            ..def(1, ResourceType::Node)
        },
        RateLimitDef {
            qps: 2,
            ..def(2, ResourceType::ServiceDefault)
        },
        RateLimitDef {
            service: Some("user".to_string()),
            qps: 3,
            ..def(3, ResourceType::Service)
        },
        RateLimitDef {
            service: Some("user".to_string()),
            path: Some("/users/list".to_string()),
            qps: 4,
            ..def(4, ResourceType::Api)
        },
    ]);

    let hit = store.resolve(&request_key(None, "user", "/users/list")).unwrap();
    assert_eq!(hit.qps, 4);

    let hit = store.resolve(&request_key(None, "user", "/users/1")).unwrap();
    assert_eq!(hit.qps, 3);

    let hit = store.resolve(&request_key(None, "order", "/orders")).unwrap();
    assert_eq!(hit.qps, 2);

    store.remove(2);
    let hit = store.resolve(&request_key(None, "order", "/orders")).unwrap();
    assert_eq!(hit.qps, 1);
}

#[test]
fn test_resolve_app_default_before_node() {
    let store = ResourceRateLimitStore::from_defs(&[
        RateLimitDef {
            qps: 1,
            ..def(1, ResourceType::Node)
        },
        RateLimitDef {
            qps: 5,
            ..def(2, ResourceType::AppDefault)
        },
    ]);
    let hit = store.resolve(&request_key(Some("mobile"), "user", "/x")).unwrap();
    assert_eq!(hit.qps, 5);

    // no app on the request: the app scopes are skipped
    let hit = store.resolve(&request_key(None, "user", "/x")).unwrap();
    assert_eq!(hit.qps, 1);
}

#[test]
fn test_from_defs_drops_invalid_entry() {
    let store = ResourceRateLimitStore::from_defs(&[RateLimitDef {
        service: Some("bad^name".to_string()),
        ..def(1, ResourceType::Service)
    }]);
    assert!(store.is_empty());
}

#[test]
fn test_sync_drops_missing_ids() {
    let store = ResourceRateLimitStore::from_defs(&[
        def(1, ResourceType::Node),
        RateLimitDef {
            service: Some("user".to_string()),
            ..def(2, ResourceType::Service)
        },
    ]);
    assert_eq!(store.len(), 2);

    store.sync(&[RateLimitDef {
        service: Some("order".to_string()),
        ..def(2, ResourceType::Service)
    }]);
    assert_eq!(store.len(), 1);
    assert!(store.get(NODE_RESOURCE).is_none());
    assert!(store.get("^^^user^").is_none());
    assert!(store.get("^^^order^").is_some());
}

#[test]
fn test_resolve_app_service_before_service() {
    let store = ResourceRateLimitStore::from_defs(&[
        RateLimitDef {
            service: Some("user".to_string()),
            qps: 3,
            ..def(1, ResourceType::Service)
        },
        RateLimitDef {
            app: Some("mobile".to_string()),
            service: Some("user".to_string()),
            concurrents: 88,
            ..def(2, ResourceType::App)
        },
    ]);
    let hit = store.resolve(&request_key(Some("mobile"), "user", "/x")).unwrap();
    assert_eq!(hit.concurrents, 88);

    let hit = store.resolve(&request_key(Some("web"), "user", "/x")).unwrap();
    assert_eq!(hit.qps, 3);
}

#[test]
fn test_shared_resource_survives_other_entry_removal() {
    let store = ResourceRateLimitStore::new();
    let on_svc = |id: i64| RateLimitDef {
        service: Some("svc".to_string()),
        qps: id as u64 * 100,
        ..def(id, ResourceType::Service)
    };
    store.upsert(&on_svc(1)).unwrap();
    store.upsert(&on_svc(2)).unwrap();

    store.remove(1);
    let cfg = store.get("^^^svc^").unwrap();
    assert_eq!(cfg.id, 2);
    assert_eq!(cfg.qps, 200);

    // entry 1 takes the slot back; moving entry 2 away must leave it
    store.upsert(&on_svc(1)).unwrap();
    store.upsert(&RateLimitDef {
        service: Some("other".to_string()),
        ..def(2, ResourceType::Service)
    })
    .unwrap();
    assert_eq!(store.get("^^^svc^").unwrap().id, 1);
    assert_eq!(store.get("^^^other^").unwrap().id, 2);
}
