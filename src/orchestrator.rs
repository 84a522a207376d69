//! Startup sequencing, signal handling, and the read-only/mutating query
//! surface a REST layer would sit on top of.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::{Config, MRoute};
use crate::error::Result;
use crate::kernel::{FlushOptions, KernelControl, VifTableEntry};
use crate::mfc_manager::MfcManager;
use crate::vif_manager::VifManager;

pub struct Daemon {
    kernel: Arc<dyn KernelControl>,
    vif: Arc<VifManager>,
    mfc: Arc<MfcManager>,
    shutdown: Arc<AtomicBool>,
    dispatcher_handle: Option<std::thread::JoinHandle<()>>,
}

impl Daemon {
    /// Runs the startup sequence: flush, disable PIM, enable MRT, build the
    /// VIF and MFC managers from `config`, spawn the dispatcher thread.
    pub fn start(kernel: Arc<dyn KernelControl>, config: &Config) -> Result<Self> {
        kernel.flush(FlushOptions::all())?;
        kernel.disable_pim()?;
        kernel.enable_mrt()?;
        info!("multicast routing table enabled");

        let vif = Arc::new(VifManager::new(kernel.clone(), &config.phyints)?);
        info!(count = vif.count(), "installed vifs");

        let mfc = Arc::new(MfcManager::new(kernel.clone(), vif.clone(), &config.mroutes)?);
        info!(count = config.mroutes.len(), "registered mroutes");

        let shutdown = Arc::new(AtomicBool::new(false));
        let dispatcher = crate::dispatcher::Dispatcher::new(kernel.clone(), mfc.clone(), shutdown.clone());
        let dispatcher_handle = std::thread::Builder::new()
            .name("mcrouted-dispatcher".to_string())
            .spawn(move || dispatcher.run())
            .expect("failed to spawn dispatcher thread");

        Ok(Daemon {
            kernel,
            vif,
            mfc,
            shutdown,
            dispatcher_handle: Some(dispatcher_handle),
        })
    }

    /// Installs a `ctrlc` SIGTERM/SIGINT handler that sets the shutdown flag.
    pub fn install_signal_handler(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        ctrlc::set_handler(move || {
            info!("received shutdown signal");
            shutdown.store(true, Ordering::Relaxed);
        })
        .map_err(|e| crate::error::Error::KernelError(e.to_string()))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Flushes kernel state and blocks until the dispatcher thread exits.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.kernel.flush(FlushOptions::all())?;
        self.kernel.disable_mrt()?;
        if let Some(handle) = self.dispatcher_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }

    pub fn list_vifs(&self) -> Result<Vec<VifTableEntry>> {
        self.kernel.read_ip_mr_vif()
    }

    pub fn find_vif(&self, name: &str) -> Result<VifTableEntry> {
        let vifi = self.vif.vifi(name)?;
        self.list_vifs()?
            .into_iter()
            .find(|v| v.vifi == vifi)
            .ok_or_else(|| crate::error::Error::NotFound(format!("vif {name}")))
    }

    pub fn add_vif(&self, interface: &crate::interface::Interface, vifi: Option<u16>) -> Result<u16> {
        self.vif.add(interface, vifi)
    }

    pub fn remove_vif_by_name(&self, name: &str) -> Result<()> {
        self.vif.remove_by_name(name)
    }

    pub fn add_mroute(&self, mroute: MRoute) -> Result<()> {
        self.mfc.add(mroute)
    }

    pub fn remove_mroute(&self, mroute: &MRoute) -> Result<()> {
        self.mfc.remove(mroute)
    }

    /// Static MFCs grouped by input vif.
    pub fn list_static_mfc(&self) -> std::collections::HashMap<u16, Vec<MRoute>> {
        self.mfc.list_static()
    }

    /// Dynamic MFC templates grouped by input vif.
    pub fn list_dynamic_mfc(&self) -> std::collections::HashMap<u16, Vec<MRoute>> {
        self.mfc.list_dynamic()
    }
}
