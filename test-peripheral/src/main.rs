//! BLE peripheral that advertises the payload service and logs every write.
//!
//! Run on a second machine (or a second adapter) to exercise payload-link
//! end to end.

use bluer::adv::Advertisement;
use bluer::gatt::local::{
    characteristic_control, Application, Characteristic, CharacteristicWrite,
    CharacteristicWriteMethod, CharacteristicWriteRequest, ReqError, Service,
};
use payload_link_shared::defaults;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOCAL_NAME: &str = "payload-sink";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!("[PERIPHERAL] Using adapter {} ({})", adapter.name(), adapter.address().await?);

    let (_control, control_handle) = characteristic_control();
    let payload_char = Characteristic {
        uuid: defaults::CHARACTERISTIC_UUID,
        write: Some(CharacteristicWrite {
            write: true,
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(
                |data: Vec<u8>, req: CharacteristicWriteRequest| {
                    Box::pin(async move {
                        info!(
                            "[PERIPHERAL] Write {:?}: {} ({} bytes, mtu {})",
                            req.op_type,
                            hex::encode(&data),
                            data.len(),
                            req.mtu
                        );
                        Ok::<(), ReqError>(())
                    })
                },
            )),
            ..Default::default()
        }),
        control_handle,
        ..Default::default()
    };

    let app = Application {
        services: vec![Service {
            uuid: defaults::SERVICE_UUID,
            primary: true,
            characteristics: vec![payload_char],
            ..Default::default()
        }],
        ..Default::default()
    };
    let _app_handle = adapter.serve_gatt_application(app).await?;
    info!("[PERIPHERAL] Serving {}", defaults::SERVICE_UUID);

    let adv = Advertisement {
        service_uuids: vec![defaults::SERVICE_UUID].into_iter().collect(),
        discoverable: Some(true),
        local_name: Some(LOCAL_NAME.to_string()),
        ..Default::default()
    };
    let _adv_handle = adapter.advertise(adv).await?;
    info!("[PERIPHERAL] Advertising as {}", LOCAL_NAME);

    tokio::signal::ctrl_c().await?;
    info!("[PERIPHERAL] Shutting down");
    Ok(())
}
