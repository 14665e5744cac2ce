//! In-process vendor backend
//!
//! Ranks of a loopback group are threads of one process that meet in a
//! shared [`LoopbackFabric`]. Each collective is one exchange round: every
//! rank deposits its host-staged tensors, the last arrival publishes the full
//! set, and each rank derives its own result from it. Rank 0 allocates the
//! fabric and publishes its id through the group's store, the way vendor
//! libraries publish a unique communicator id.

use mosaic_interfaces::{
    deadline::deadline_after, CollectiveGroup, GroupFactory, GroupRef, HostBuffer, Store, TensorRef,
    VendorBackend, Work,
};
use mosaic_rendezvous::{combine_host, divide_host};
use mosaic_types::{
    CollectiveOptions, DeviceHandle, MosaicError, OpKind, ReduceOp, Result, VendorKind,
};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

static FABRICS: Lazy<Mutex<HashMap<u64, Weak<LoopbackFabric>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_FABRIC_ID: AtomicU64 = AtomicU64::new(1);

const FABRIC_KEY: &str = "loopback/fabric";

type Round = Arc<Vec<Vec<HostBuffer>>>;

struct ExchangeState {
    slots: Vec<Option<Vec<HostBuffer>>>,
    arrived: usize,
    generation: u64,
    published: Option<Round>,
}

/// Shared meeting point for the ranks of one loopback group
pub struct LoopbackFabric {
    id: u64,
    vendor: VendorKind,
    size: usize,
    state: Mutex<ExchangeState>,
    round_done: Condvar,
}

impl std::fmt::Debug for LoopbackFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackFabric")
            .field("id", &self.id)
            .field("vendor", &self.vendor)
            .field("size", &self.size)
            .finish()
    }
}

impl LoopbackFabric {
    fn create(vendor: VendorKind, size: usize) -> Arc<Self> {
        let id = NEXT_FABRIC_ID.fetch_add(1, Ordering::Relaxed);
        let fabric = Arc::new(Self {
            id,
            vendor,
            size,
            state: Mutex::new(ExchangeState {
                slots: (0..size).map(|_| None).collect(),
                arrived: 0,
                generation: 0,
                published: None,
            }),
            round_done: Condvar::new(),
        });

        let mut fabrics = FABRICS.lock();
        fabrics.retain(|_, weak| weak.strong_count() > 0);
        fabrics.insert(id, Arc::downgrade(&fabric));
        fabric
    }

    fn lookup(id: u64) -> Option<Arc<Self>> {
        FABRICS.lock().get(&id).and_then(Weak::upgrade)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Deposit `contribution` and block until every rank has deposited.
    ///
    /// On timeout the contribution is withdrawn so the round stays consistent
    /// for the ranks that are still waiting.
    fn exchange(&self, rank: usize, contribution: Vec<HostBuffer>, timeout: Duration) -> Result<Round> {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();
        if state.slots[rank].is_some() {
            return Err(MosaicError::internal(format!(
                "rank {} entered a loopback round twice",
                rank
            )));
        }

        let generation = state.generation;
        state.slots[rank] = Some(contribution);
        state.arrived += 1;

        if state.arrived == self.size {
            let round: Vec<Vec<HostBuffer>> = state
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            let round = Arc::new(round);
            state.published = Some(round.clone());
            state.arrived = 0;
            state.generation += 1;
            self.round_done.notify_all();
            return Ok(round);
        }

        while state.generation == generation {
            let Some(deadline) = deadline else {
                self.round_done.wait(&mut state);
                continue;
            };
            if self.round_done.wait_until(&mut state, deadline).timed_out()
                && state.generation == generation
            {
                state.slots[rank] = None;
                state.arrived -= 1;
                return Err(MosaicError::timeout(format!(
                    "loopback rank {} waited {:?} for {} peer(s)",
                    rank,
                    timeout,
                    self.size - state.arrived - 1
                )));
            }
        }

        state
            .published
            .clone()
            .ok_or_else(|| MosaicError::internal("loopback round completed without data"))
    }
}

/// Loopback implementation of a vendor collective library
#[derive(Debug)]
pub struct LoopbackBackend {
    vendor: VendorKind,
    name: String,
    failures: Arc<RwLock<HashMap<OpKind, String>>>,
}

impl LoopbackBackend {
    pub fn new(vendor: VendorKind) -> Self {
        Self {
            vendor,
            name: format!("loopback-{}", vendor),
            failures: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Make every group of this backend fail `op` with `message`
    pub fn inject_failure(&self, op: OpKind, message: impl Into<String>) {
        self.failures.write().insert(op, message.into());
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }
}

impl GroupFactory for LoopbackBackend {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn create_group(
        &self,
        store: Arc<dyn Store>,
        rank: usize,
        size: usize,
        timeout: Duration,
    ) -> Result<GroupRef> {
        if size == 0 || rank >= size {
            return Err(MosaicError::config(format!(
                "rank {} invalid for loopback group of size {}",
                rank, size
            )));
        }

        let fabric = if rank == 0 {
            let fabric = LoopbackFabric::create(self.vendor, size);
            store.set(FABRIC_KEY, &fabric.id().to_le_bytes())?;
            fabric
        } else {
            let raw = store.get(FABRIC_KEY, timeout)?;
            let id = <[u8; 8]>::try_from(raw.as_slice())
                .map(u64::from_le_bytes)
                .map_err(|_| MosaicError::rendezvous("malformed loopback fabric id"))?;
            LoopbackFabric::lookup(id).ok_or_else(|| {
                MosaicError::rendezvous(format!("loopback fabric {} no longer exists", id))
            })?
        };

        if fabric.size != size || fabric.vendor != self.vendor {
            return Err(MosaicError::rendezvous(format!(
                "loopback fabric {} is a {} group of size {}, rank {} expected {} of size {}",
                fabric.id, fabric.vendor, fabric.size, rank, self.vendor, size
            )));
        }

        // Join barrier: the group exists once every rank has arrived
        fabric.exchange(rank, Vec::new(), timeout)?;
        debug!(
            "{} rank {}/{} joined fabric {}",
            self.name, rank, size, fabric.id
        );
        if rank == 0 {
            info!("{} group formed with {} rank(s)", self.name, size);
        }

        Ok(Arc::new(LoopbackGroup {
            name: self.name.clone(),
            fabric,
            rank,
            size,
            timeout,
            failures: self.failures.clone(),
        }))
    }
}

impl VendorBackend for LoopbackBackend {
    fn vendor(&self) -> VendorKind {
        self.vendor
    }
}

/// One rank's view of a loopback group
#[derive(Debug)]
pub struct LoopbackGroup {
    name: String,
    fabric: Arc<LoopbackFabric>,
    rank: usize,
    size: usize,
    timeout: Duration,
    failures: Arc<RwLock<HashMap<OpKind, String>>>,
}

impl LoopbackGroup {
    fn injected_failure(&self, op: OpKind) -> Option<MosaicError> {
        self.failures
            .read()
            .get(&op)
            .map(|message| MosaicError::device(message.clone()))
    }

    fn stage(tensors: &[TensorRef]) -> Result<Vec<HostBuffer>> {
        tensors.iter().map(|t| t.to_host()).collect()
    }

    fn round(&self, op: OpKind, tensors: &[TensorRef], opts: &CollectiveOptions) -> Result<Round> {
        let round = self.fabric.exchange(
            self.rank,
            Self::stage(tensors)?,
            opts.timeout.unwrap_or(self.timeout),
        )?;
        if let Some(rank) = round.iter().position(|list| list.len() != tensors.len()) {
            return Err(MosaicError::shape_mismatch(
                op,
                format!(
                    "rank {} passed {} tensor(s), rank {} passed {}",
                    rank,
                    round[rank].len(),
                    self.rank,
                    tensors.len()
                ),
            ));
        }
        Ok(round)
    }

    fn finish(&self, op: OpKind, device: DeviceHandle, result: Result<Vec<TensorRef>>) -> Work {
        Work::completed(op, device, result)
    }

    fn first_device(op: OpKind, tensors: &[TensorRef]) -> Result<DeviceHandle> {
        tensors
            .first()
            .map(|t| t.device())
            .ok_or_else(|| MosaicError::shape_mismatch(op, "empty tensor list"))
    }

    fn run_broadcast(&self, tensors: &[TensorRef], opts: &CollectiveOptions) -> Result<Vec<TensorRef>> {
        let root = opts.root_rank;
        if root >= self.size {
            return Err(MosaicError::shape_mismatch(
                OpKind::Broadcast,
                format!("root {} out of range for group of size {}", root, self.size),
            ));
        }
        let round = self.round(OpKind::Broadcast, tensors, opts)?;
        for (tensor, source) in tensors.iter().zip(&round[root]) {
            tensor.copy_from_host(source)?;
        }
        Ok(tensors.to_vec())
    }

    fn run_allreduce(&self, tensors: &[TensorRef], opts: &CollectiveOptions) -> Result<Vec<TensorRef>> {
        let round = self.round(OpKind::Allreduce, tensors, opts)?;
        for (index, tensor) in tensors.iter().enumerate() {
            let mut acc = round[0][index].clone();
            for list in round.iter().skip(1) {
                combine_host(&mut acc, &list[index], opts.reduce_op)
                    .map_err(|e| MosaicError::shape_mismatch(OpKind::Allreduce, e.to_string()))?;
            }
            if opts.reduce_op == ReduceOp::Avg {
                divide_host(&mut acc, self.size);
            }
            tensor.copy_from_host(&acc)?;
        }
        Ok(tensors.to_vec())
    }

    fn run_allgather(
        &self,
        outputs: &[Vec<TensorRef>],
        inputs: &[TensorRef],
        opts: &CollectiveOptions,
    ) -> Result<Vec<TensorRef>> {
        if outputs.len() != inputs.len() || outputs.iter().any(|list| list.len() != self.size) {
            return Err(MosaicError::shape_mismatch(
                OpKind::Allgather,
                format!(
                    "expected {} output list(s) of {} tensor(s)",
                    inputs.len(),
                    self.size
                ),
            ));
        }
        let round = self.round(OpKind::Allgather, inputs, opts)?;
        for (index, list) in outputs.iter().enumerate() {
            for (rank, output) in list.iter().enumerate() {
                output.copy_from_host(&round[rank][index])?;
            }
        }
        Ok(outputs.iter().flatten().cloned().collect())
    }
}

impl CollectiveGroup for LoopbackGroup {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, tensors: &[TensorRef], opts: &CollectiveOptions) -> Result<Work> {
        let device = Self::first_device(OpKind::Broadcast, tensors)?;
        let result = match self.injected_failure(OpKind::Broadcast) {
            Some(err) => Err(err),
            None => self.run_broadcast(tensors, opts),
        };
        Ok(self.finish(OpKind::Broadcast, device, result))
    }

    fn allreduce(&self, tensors: &[TensorRef], opts: &CollectiveOptions) -> Result<Work> {
        let device = Self::first_device(OpKind::Allreduce, tensors)?;
        let result = match self.injected_failure(OpKind::Allreduce) {
            Some(err) => Err(err),
            None => self.run_allreduce(tensors, opts),
        };
        Ok(self.finish(OpKind::Allreduce, device, result))
    }

    fn allgather(
        &self,
        outputs: &[Vec<TensorRef>],
        inputs: &[TensorRef],
        opts: &CollectiveOptions,
    ) -> Result<Work> {
        let device = Self::first_device(OpKind::Allgather, inputs)?;
        let result = match self.injected_failure(OpKind::Allgather) {
            Some(err) => Err(err),
            None => self.run_allgather(outputs, inputs, opts),
        };
        Ok(self.finish(OpKind::Allgather, device, result))
    }
}
