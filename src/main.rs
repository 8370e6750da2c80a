use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::info;
use tokio::sync::watch;

use specterm::pipeline::{SnapshotReceiver, SnapshotSender};
use specterm::{MicSource, Pipeline, Settings, Tui};

/// Redraw period for the terminal, independent of the acquisition rate.
const RENDER_INTERVAL: Duration = Duration::from_millis(33);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let settings = Settings::load()?;
    info!(
        "starting with rate {} Hz, {} samples per read, window of {} reads",
        settings.rate,
        settings.read_len(),
        settings.samples_per_frame
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let (snapshot_tx, mut snapshot_rx): (SnapshotSender, SnapshotReceiver) = watch::channel(None);

    // Open the device before touching the terminal so startup failures
    // print normally.
    let source = MicSource::open(&settings, shutdown_rx.clone())?;
    let pipeline = Pipeline::new(&settings, source, snapshot_tx, shutdown_rx)?;
    let mut pipeline_task = tokio::spawn(pipeline.run());

    // SIGINT only reaches us outside raw mode; inside it Ctrl-C arrives
    // as a key event handled by the TUI.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let mut tui = Tui::new(&settings)?;
    let pipeline_result = loop {
        tui.handle_events()?;
        if tui.should_quit() {
            let _ = shutdown_tx.send(true);
            break (&mut pipeline_task).await?;
        }
        if pipeline_task.is_finished() {
            break (&mut pipeline_task).await?;
        }

        let snapshot = snapshot_rx.borrow_and_update().clone();
        tui.render(snapshot.as_deref())?;

        tokio::time::sleep(RENDER_INTERVAL).await;
    };

    // Restore the terminal before reporting whatever ended the run.
    drop(tui);
    pipeline_result?;

    info!("clean exit");
    Ok(())
}
