//! Startup walkthrough of a fake-db instance

use broker_engine::Broker;
use broker_fake::plans::{self, STANDARD};
use broker_types::PlanId;
use serde_json::json;

pub async fn run(broker: &Broker) -> anyhow::Result<()> {
    let instance = broker
        .provision(
            &plans::service_id(),
            &PlanId::new(STANDARD),
            json!({
                "location": "westeurope",
                "sku": "S1",
                "firewall_start_ip": "10.0.0.0",
                "firewall_end_ip": "10.0.0.255"
            }),
            json!({}),
        )
        .await?;
    tracing::info!(instance_id = %instance.id, "Demo instance accepted");

    let ready = broker.driver().drive(instance.id).await?;
    tracing::info!(instance_id = %ready.id, status = ?ready.status, "Demo instance provisioned");

    let binding = broker.bind(ready.id, json!({"role": "reader"}), json!({})).await?;
    let credentials = broker.credentials(binding.id).await?;
    // Only key names; values are secret.
    tracing::info!(
        binding_id = %binding.id,
        keys = ?credentials.keys().collect::<Vec<_>>(),
        "Demo credentials projected"
    );

    broker.update(ready.id, None, json!({"sku": "S2"}), json!({})).await?;
    let updated = broker.driver().drive(ready.id).await?;
    tracing::info!(instance_id = %updated.id, "Demo instance updated");

    broker.unbind(binding.id).await?;
    broker.deprovision(ready.id).await?;
    broker.driver().drive(ready.id).await?;
    tracing::info!(instance_id = %ready.id, "Demo instance deprovisioned");

    Ok(())
}
