use crate::engine::RenderEngine;
use crate::{BBox, Error, LayerPolicy, MapConfig, MapHandle, RenderOpts, Result};
use log::debug;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Load(PathBuf, oneshot::Sender<Result<()>>),
    LoadString(String, Option<PathBuf>, oneshot::Sender<Result<()>>),
    ZoomAll(oneshot::Sender<Result<()>>),
    ZoomToBox(BBox, oneshot::Sender<Result<()>>),
    Resize(u32, u32, oneshot::Sender<Result<()>>),
    Extent(oneshot::Sender<Result<Option<BBox>>>),

    // Layers
    SelectLayers(LayerPolicy, oneshot::Sender<Result<()>>),
    ResetLayers(oneshot::Sender<Result<()>>),
    Layers(oneshot::Sender<Result<Vec<(String, bool)>>>),

    Render(RenderOpts, oneshot::Sender<Result<Vec<u8>>>),
    RenderToFile(RenderOpts, PathBuf, oneshot::Sender<Result<()>>),

    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly map backed by a dedicated worker thread.
///
/// The worker thread owns a synchronous [`MapHandle`] and executes commands
/// sent from async tasks in arrival order, so the engine never has to be
/// `Send`. Clones share the same worker and the same map.
#[derive(Clone)]
pub struct MapWorker {
    cmd_tx: Sender<Command>,
}

impl MapWorker {
    /// Create a map on a new worker thread, backed by engine `E`
    pub async fn new<E: RenderEngine + 'static>(config: MapConfig) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::spawn(move || {
            // Build the map on the worker thread
            let mut map = match MapHandle::<E>::new(config) {
                Ok(m) => m,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Load(path, resp) => {
                        let _ = resp.send(map.load(&path));
                    }
                    Command::LoadString(text, base, resp) => {
                        let _ = resp.send(map.load_string(&text, base.as_deref()));
                    }
                    Command::ZoomAll(resp) => {
                        let _ = resp.send(map.zoom_all());
                    }
                    Command::ZoomToBox(bbox, resp) => {
                        let _ = resp.send(map.zoom_to_box(bbox));
                    }
                    Command::Resize(w, h, resp) => {
                        let _ = resp.send(map.resize(w, h));
                    }
                    Command::Extent(resp) => {
                        let _ = resp.send(map.extent());
                    }
                    Command::SelectLayers(policy, resp) => {
                        let _ = resp.send(map.select_layers(policy));
                    }
                    Command::ResetLayers(resp) => {
                        let _ = resp.send(map.reset_layers());
                    }
                    Command::Layers(resp) => {
                        let _ = resp.send(map.layers());
                    }
                    Command::Render(opts, resp) => {
                        let _ = resp.send(map.render(&opts));
                    }
                    Command::RenderToFile(opts, path, resp) => {
                        let _ = resp.send(map.render_to_file(&opts, &path));
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(map.release());
                        break;
                    }
                }
            }
            debug!("map worker stopped");
        });

        // A worker that died before answering counts as a lost map
        init_rx.await.map_err(|_| Error::ResourceError)??;
        Ok(Self { cmd_tx })
    }

    /// Create a map backed by the software engine
    #[cfg(feature = "soft")]
    pub async fn spawn(config: MapConfig) -> Result<Self> {
        Self::new::<crate::SoftEngine>(config).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(command(tx))
            .map_err(|_| Error::ResourceError)?;
        rx.await.map_err(|_| Error::ResourceError)?
    }

    pub async fn load(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.request(|tx| Command::Load(path, tx)).await
    }

    pub async fn load_string(&self, text: &str, base: Option<PathBuf>) -> Result<()> {
        let text = text.to_string();
        self.request(|tx| Command::LoadString(text, base, tx)).await
    }

    pub async fn zoom_all(&self) -> Result<()> {
        self.request(Command::ZoomAll).await
    }

    pub async fn zoom_to_box(&self, bbox: BBox) -> Result<()> {
        self.request(|tx| Command::ZoomToBox(bbox, tx)).await
    }

    pub async fn resize(&self, width: u32, height: u32) -> Result<()> {
        self.request(|tx| Command::Resize(width, height, tx)).await
    }

    pub async fn extent(&self) -> Result<Option<BBox>> {
        self.request(Command::Extent).await
    }

    /// Apply a layer policy; see [`MapHandle::select_layers`]
    pub async fn select_layers(&self, policy: LayerPolicy) -> Result<()> {
        self.request(|tx| Command::SelectLayers(policy, tx)).await
    }

    pub async fn reset_layers(&self) -> Result<()> {
        self.request(Command::ResetLayers).await
    }

    pub async fn layers(&self) -> Result<Vec<(String, bool)>> {
        self.request(Command::Layers).await
    }

    pub async fn render(&self, opts: RenderOpts) -> Result<Vec<u8>> {
        self.request(|tx| Command::Render(opts, tx)).await
    }

    pub async fn render_to_file(&self, opts: RenderOpts, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.request(|tx| Command::RenderToFile(opts, path, tx)).await
    }

    /// Release the map and stop the worker. Other clones fail with
    /// [`Error::ResourceError`] afterwards.
    pub async fn close(self) -> Result<()> {
        self.request(Command::Close).await
    }
}
