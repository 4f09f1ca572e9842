//! End-to-end acceptance scenarios against the fake-db module.

mod common;

use broker_engine::{Advance, ServiceManager};
use broker_fake::client::ControlPlane;
use broker_types::{ErrorKind, InstanceStatus, PlanId};
use common::{service, TestEnv};
use serde_json::json;

#[tokio::test]
async fn test_transient_failure_costs_one_extra_invocation() {
    let env = TestEnv::new();
    env.plane.fail_next("create_server", 1);

    let instance = env
        .broker
        .provision(
            &service(),
            &PlanId::new("basic"),
            json!({"location": "eastus"}),
            json!({}),
        )
        .await
        .unwrap();

    let mut invocations = 0;
    let mut retries = 0;
    loop {
        invocations += 1;
        let advance = env.broker.driver().step_once(instance.id).await.unwrap();
        match advance {
            Advance::Completed(_) => break,
            Advance::Retry { ref step, .. } => {
                assert_eq!(step, "create_server");
                retries += 1;
            }
            Advance::Progressed(_) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(invocations < 10);
    }

    assert_eq!(invocations, 4);
    assert_eq!(retries, 1);
    let stored = env.broker.instance(instance.id).await.unwrap();
    assert_eq!(stored.status, InstanceStatus::Ready);
    assert_eq!(env.plane.calls("create_server"), 1);
}

#[tokio::test]
async fn test_identical_binds_share_one_login() {
    let env = TestEnv::new();
    let instance = env.ready_instance("basic").await;
    let parameters = env
        .manager
        .parse_binding_parameters(json!({"role": "reader"}), json!({}))
        .unwrap();

    let first = env.manager.bind(&instance, &parameters).await.unwrap();
    let second = env.manager.bind(&instance, &parameters).await.unwrap();
    assert_eq!(first, second);

    let server = instance.details.plain().get_str("server_name").unwrap();
    assert_eq!(env.plane.logins(server).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unbind_after_out_of_band_removal_succeeds() {
    let env = TestEnv::new();
    let instance = env.ready_instance("basic").await;
    let binding = env
        .broker
        .bind(instance.id, json!({}), json!({}))
        .await
        .unwrap();

    let server = instance.details.plain().get_str("server_name").unwrap();
    let login = binding.details.plain().get_str("login_name").unwrap();
    assert!(env.plane.remove_login_out_of_band(server, login));

    env.broker.unbind(binding.id).await.unwrap();
    assert!(env.broker.bindings(instance.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_of_immutable_location_is_rejected() {
    let env = TestEnv::new();
    let instance = env.ready_instance("basic").await;

    let err = env
        .broker
        .update(instance.id, None, json!({"location": "westus"}), json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let stored = env.broker.instance(instance.id).await.unwrap();
    assert_eq!(stored, instance);
    assert_eq!(stored.status, InstanceStatus::Ready);
}
