//! In-process self test
//!
//! Spins up `domains x ranks` ranks as threads. Every domain gets its own
//! loopback vendor library and every local rank 0 joins a TCP mesh over
//! loopback, so both collective stages run exactly as they would across
//! machines. The mean correction and re-broadcast settings come from the
//! loaded configuration and the expected results follow them.

use crate::output::{to_json, OutputFormat};
use clap::Args;
use colored::*;
use mosaic_engine::{BackendContext, DeviceRegistry, HeteroGroupFactory};
use mosaic_interfaces::{CollectiveGroup, HostBuffer, Store, TensorLike};
use mosaic_rendezvous::MemoryStore;
use mosaic_runtime::{HostTensor, StaticProbe, VendorRegistry};
use mosaic_types::{
    BackendConfig, CollectiveOptions, DeviceHandle, MeanCorrection, MosaicError, ReduceOp,
    RendezvousConfig, Result, VendorKind,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const DOMAIN_VENDORS: [VendorKind; 3] = [VendorKind::Cuda, VendorKind::Mlu, VendorKind::Rocm];

#[derive(Args, Debug)]
pub struct SelftestCommand {
    /// Number of device domains, each served by a different vendor
    #[arg(long, default_value = "2")]
    pub domains: usize,

    /// Local ranks per domain
    #[arg(long, default_value = "2")]
    pub ranks: usize,

    /// Elements per tensor
    #[arg(long, default_value = "1024")]
    pub elements: usize,

    /// Broadcast and all-reduce rounds
    #[arg(long, default_value = "3")]
    pub rounds: usize,

    /// Timeout for group formation and each collective, in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}

#[derive(Debug, Serialize)]
struct SelftestReport {
    domains: usize,
    ranks_per_domain: usize,
    world_size: usize,
    rounds: usize,
    mean_correction: MeanCorrection,
    rebroadcast: bool,
    elapsed_ms: u128,
    transport: Vec<DomainTransport>,
}

#[derive(Debug, Serialize)]
struct DomainTransport {
    domain: usize,
    vendor: VendorKind,
    report: String,
}

#[derive(Debug, Clone, Copy)]
struct RankPlan {
    domain: usize,
    local_rank: usize,
    domains: usize,
    ranks: usize,
    elements: usize,
    rounds: usize,
    timeout: Duration,
    mean_correction: MeanCorrection,
    rebroadcast: bool,
}

impl RankPlan {
    fn vendor(&self) -> VendorKind {
        DOMAIN_VENDORS[self.domain]
    }

    fn global(&self) -> usize {
        self.domain * self.ranks + self.local_rank
    }

    fn world_size(&self) -> usize {
        self.domains * self.ranks
    }

    /// Whether this rank sees the cross-domain result
    fn receives_cross_domain(&self) -> bool {
        self.domains > 1 && (self.local_rank == 0 || self.rebroadcast)
    }

    /// Broadcast from global rank 0: its own domain always matches, the
    /// others only once the cross-domain result reaches this rank
    fn expected_broadcast(&self, source: &[f32]) -> Vec<f32> {
        if self.domain == 0 || self.receives_cross_domain() {
            source.to_vec()
        } else {
            vec![0.0; self.elements]
        }
    }

    /// Sum of `global + 1` over every rank, as the configured policy leaves it
    fn expected_allreduce(&self) -> f32 {
        let n = self.world_size();
        let total = (n * (n + 1) / 2) as f64;
        if self.domains == 1 {
            return total as f32;
        }
        if !self.receives_cross_domain() {
            // Vendor stage only: the sum over this domain
            let first = self.domain * self.ranks + 1;
            return (first..first + self.ranks).sum::<usize>() as f32;
        }
        match self.mean_correction {
            MeanCorrection::Disabled => total as f32,
            MeanCorrection::AfterRing | MeanCorrection::BeforeRing => {
                (total / self.domains as f64) as f32
            }
        }
    }
}

pub async fn execute(cmd: SelftestCommand, config: BackendConfig, format: OutputFormat) -> Result<()> {
    if cmd.domains == 0 || cmd.domains > DOMAIN_VENDORS.len() {
        return Err(MosaicError::config(format!(
            "Domains must be between 1 and {}",
            DOMAIN_VENDORS.len()
        )));
    }
    if cmd.ranks == 0 || cmd.elements == 0 {
        return Err(MosaicError::config("Ranks and elements must be greater than 0"));
    }

    let start = Instant::now();
    let cross_store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let mut handles = Vec::new();

    for domain in 0..cmd.domains {
        let domain_store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        for local_rank in 0..cmd.ranks {
            let plan = RankPlan {
                domain,
                local_rank,
                domains: cmd.domains,
                ranks: cmd.ranks,
                elements: cmd.elements,
                rounds: cmd.rounds,
                timeout: Duration::from_secs(cmd.timeout),
                mean_correction: config.mean_correction,
                rebroadcast: config.rebroadcast_after_cross_domain,
            };
            let cross_store = cross_store.clone();
            let domain_store = domain_store.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                run_rank(plan, domain_store, cross_store)
            }));
        }
    }

    let mut transport = Vec::new();
    for handle in handles {
        let outcome = handle
            .await
            .map_err(|e| MosaicError::internal(format!("selftest rank panicked: {}", e)))??;
        if let Some(domain) = outcome {
            transport.push(domain);
        }
    }
    transport.sort_by_key(|t| t.domain);

    let report = SelftestReport {
        domains: cmd.domains,
        ranks_per_domain: cmd.ranks,
        world_size: cmd.domains * cmd.ranks,
        rounds: cmd.rounds,
        mean_correction: config.mean_correction,
        rebroadcast: config.rebroadcast_after_cross_domain,
        elapsed_ms: start.elapsed().as_millis(),
        transport,
    };

    match format {
        OutputFormat::Json => println!("{}", to_json(&report)?),
        OutputFormat::Pretty => {
            println!(
                "{} {} rank(s) across {} domain(s) passed {} round(s) in {} ms",
                "✓".green(),
                report.world_size,
                report.domains,
                report.rounds,
                report.elapsed_ms
            );
            println!(
                "  Mean correction: {:?}, re-broadcast: {}",
                report.mean_correction, report.rebroadcast
            );
            for domain in &report.transport {
                println!(
                    "\n{} domain {} ({})",
                    "Transport timings:".bright_blue(),
                    domain.domain,
                    domain.vendor.label()
                );
                print!("{}", domain.report);
            }
        }
    }

    Ok(())
}

/// One rank's lifetime; local rank 0 returns its mesh timing report
fn run_rank(
    plan: RankPlan,
    domain_store: Arc<dyn Store>,
    cross_store: Arc<dyn Store>,
) -> Result<Option<DomainTransport>> {
    let vendor = plan.vendor();
    let config = BackendConfig {
        rendezvous: (plan.domains > 1).then(|| RendezvousConfig {
            rank: plan.domain,
            world_size: plan.domains,
            transport_addr: "127.0.0.1:0".to_string(),
            store_path: std::env::temp_dir().join("mosaic-selftest"),
            connect_timeout_secs: plan.timeout.as_secs().max(1),
        }),
        mean_correction: plan.mean_correction,
        rebroadcast_after_cross_domain: plan.rebroadcast,
        timeout_secs: plan.timeout.as_secs().max(1),
        ..BackendConfig::default()
    };

    let probe = (0..plan.ranks).fold(StaticProbe::new(vendor), |probe, _| {
        probe.with_healthy("selftest device", 16 << 30)
    });
    let context = Arc::new(BackendContext::new(
        config,
        DeviceRegistry::with_probes(vec![Arc::new(probe)]),
        VendorRegistry::with_loopback(&[vendor]),
    ));
    let group = HeteroGroupFactory::new(context)
        .with_cross_domain_store(cross_store)
        .create(domain_store, plan.local_rank, plan.ranks, plan.timeout)?;

    let device = DeviceHandle::new(vendor, plan.local_rank);
    let source: Vec<f32> = (0..plan.elements).map(|i| i as f32).collect();
    let expected_broadcast = plan.expected_broadcast(&source);
    let expected_allreduce = vec![plan.expected_allreduce(); plan.elements];

    for round in 0..plan.rounds {
        let values = if plan.global() == 0 {
            source.clone()
        } else {
            vec![0.0; plan.elements]
        };
        let tensor = HostTensor::from_vec(values, device)?.into_ref();
        group
            .broadcast(&[tensor.clone()], &CollectiveOptions::broadcast(0))?
            .wait_result(Some(plan.timeout))?;
        verify(&plan, "broadcast", round, tensor.to_host()?, &expected_broadcast)?;

        let contribution = (plan.global() + 1) as f32;
        let tensor = HostTensor::from_vec(vec![contribution; plan.elements], device)?.into_ref();
        group
            .allreduce(&[tensor.clone()], &CollectiveOptions::allreduce(ReduceOp::Sum))?
            .wait_result(Some(plan.timeout))?;
        verify(&plan, "allreduce", round, tensor.to_host()?, &expected_allreduce)?;
    }
    info!("Rank {} finished {} round(s)", plan.global(), plan.rounds);

    Ok(group.cross_domain().map(|mesh| DomainTransport {
        domain: plan.domain,
        vendor,
        report: mesh.stats().report(),
    }))
}

/// Compare within a relative tolerance; corrected sums are not exact in f32
fn verify(plan: &RankPlan, op: &str, round: usize, actual: HostBuffer, expected: &[f32]) -> Result<()> {
    if let HostBuffer::F32(values) = &actual {
        let close = values.len() == expected.len()
            && values
                .iter()
                .zip(expected)
                .all(|(a, e)| (a - e).abs() <= 1e-5 * e.abs().max(1.0));
        if close {
            return Ok(());
        }
    }
    Err(MosaicError::internal(format!(
        "{} round {} produced a wrong result on rank {} ({})",
        op,
        round,
        plan.global(),
        DeviceHandle::new(plan.vendor(), plan.local_rank)
    )))
}
