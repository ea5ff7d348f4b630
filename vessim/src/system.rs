//! The system container: owns the object arena, solver registry, type
//! index, databases and simulation time, and runs the initialization and
//! cleanup machinery.

use crate::error::{Claim, Error, Result};
use crate::mesh::MeshGenerator;
use crate::object::{Object, ObjectRef};
use crate::solver::{default_integrate, default_solve, InitializeHook, Solver};
use crate::variable::{Variable, VariableRef, VariableType};
use chrono::{NaiveDate, Utc};
use frame_algebra::{DerivativeLevel, FrameId, FrameVector, StateDerivative, StateVector, EPS};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

/// Simulation time source: a fixed MJD date, or the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SimTime {
    Realtime,
    Mjd(f64),
}

/// Current wall-clock time as MJD.
fn wall_clock_mjd() -> f64 {
    let j2000 = NaiveDate::from_ymd_opt(2000, 1, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    let seconds = Utc::now()
        .naive_utc()
        .signed_duration_since(j2000)
        .num_milliseconds() as f64
        / 1000.0;
    // JD of the J2000 epoch minus the MJD offset
    2451545.0 - 2400000.5 + seconds / 86400.0
}

struct Shared {
    objects: RwLock<Vec<Option<ObjectRef>>>,
    root: FrameId,
    solvers: RwLock<Vec<Arc<dyn Solver>>>,
    type_index: Mutex<HashMap<String, Vec<FrameId>>>,
    databases: Mutex<Vec<VariableRef>>,
    deleted: Mutex<Vec<FrameId>>,
    cleanup_lock: Mutex<()>,
    time: Mutex<SimTime>,
    on_initialize: RwLock<Option<Box<InitializeHook>>>,
    mesh_generator: RwLock<Option<Box<dyn MeshGenerator>>>,
    next_uid: AtomicU32,
}

/// Handle to a simulation system. Cheap to clone; all clones share the
/// same state, so a clone can be moved into the initializer thread.
#[derive(Clone)]
pub struct System {
    shared: Arc<Shared>,
}

impl System {
    /// Creates a system with its root inertial-space frame.
    pub fn new() -> Self {
        let root_id = FrameId::new(0);
        let root = Arc::new(Object::new(root_id, None, 0, 1, 0.0));
        root.set_type("inertial_space").unwrap();
        root.set_name("inertial_space").unwrap();
        root.initialized.store(true, Ordering::Release);

        let mut type_index = HashMap::new();
        type_index.insert("inertial_space".to_string(), vec![root_id]);

        System {
            shared: Arc::new(Shared {
                objects: RwLock::new(vec![Some(root)]),
                root: root_id,
                solvers: RwLock::new(Vec::new()),
                type_index: Mutex::new(type_index),
                databases: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
                cleanup_lock: Mutex::new(()),
                time: Mutex::new(SimTime::Realtime),
                on_initialize: RwLock::new(None),
                mesh_generator: RwLock::new(None),
                next_uid: AtomicU32::new(2),
            }),
        }
    }

    /// Root inertial-space frame; parent of all orphan objects' frames and
    /// anchor of every conversion walk.
    pub fn root(&self) -> ObjectRef {
        self.resolve(self.shared.root).unwrap()
    }

    pub fn root_id(&self) -> FrameId {
        self.shared.root
    }

    /// Looks up the object behind a frame handle. Destroyed objects are
    /// not returned.
    pub fn object(&self, id: FrameId) -> Result<ObjectRef> {
        let object = self.resolve(id)?;
        object.check_alive()?;
        Ok(object)
    }

    /// Resolves a frame handle into an object reference. The object may be
    /// flagged destroyed; a retired slot returns `InvalidObject`.
    pub(crate) fn resolve(&self, id: FrameId) -> Result<ObjectRef> {
        self.shared
            .objects
            .read()
            .unwrap()
            .get(id.index())
            .and_then(|slot| slot.clone())
            .ok_or(Error::InvalidObject)
    }

    pub(crate) fn parent_of(&self, id: FrameId) -> Result<Option<FrameId>> {
        Ok(self.resolve(id)?.parent_id())
    }

    pub(crate) fn depth_of(&self, id: FrameId) -> Result<u32> {
        Ok(self.resolve(id)?.depth())
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    /// Sets the simulation time to a fixed MJD date.
    pub fn set_time(&self, mjd: f64) {
        *self.shared.time.lock().unwrap() = SimTime::Mjd(mjd);
    }

    /// Switches the simulation time to track the wall clock.
    pub fn set_realtime(&self) {
        *self.shared.time.lock().unwrap() = SimTime::Realtime;
    }

    /// Current simulation time as MJD.
    pub fn time_mjd(&self) -> f64 {
        match *self.shared.time.lock().unwrap() {
            SimTime::Realtime => wall_clock_mjd(),
            SimTime::Mjd(mjd) => mjd,
        }
    }

    // ------------------------------------------------------------------
    // Solvers, hooks, collaborators
    // ------------------------------------------------------------------

    /// Appends a solver to the registry and runs its startup callback.
    pub fn register_solver(&self, solver: Arc<dyn Solver>) -> Result<()> {
        solver.on_startup(self)?;
        self.shared.solvers.write().unwrap().push(solver);
        Ok(())
    }

    /// Installs the global pre-initialization hook, replacing any previous
    /// one. Pass `None` to disable.
    pub fn set_on_initialize(&self, hook: Option<Box<InitializeHook>>) {
        *self.shared.on_initialize.write().unwrap() = hook;
    }

    /// Installs the external mesh generator used for geometry-derived mass
    /// properties.
    pub fn set_mesh_generator(&self, generator: Option<Box<dyn MeshGenerator>>) {
        *self.shared.mesh_generator.write().unwrap() = generator;
    }

    /// Runs solver shutdown callbacks and releases destroyed objects.
    /// Callers stop all integrator threads first.
    pub fn shutdown(&self) {
        self.cleanup_objects();
        for solver in self.shared.solvers.read().unwrap().iter() {
            if let Err(error) = solver.on_shutdown(self) {
                warn!("solver shutdown failed: {error}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Databases
    // ------------------------------------------------------------------

    /// Adds (or returns) a named database: a top-level nested variable.
    pub fn add_database(&self, name: &str) -> VariableRef {
        let mut databases = self.shared.databases.lock().unwrap();
        if let Some(existing) = databases.iter().find(|d| d.name() == name) {
            return existing.clone();
        }
        let database = Arc::new(Variable::new(name, VariableType::Nested));
        databases.push(database.clone());
        database
    }

    pub fn database(&self, name: &str) -> Result<VariableRef> {
        self.shared
            .databases
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn database_entries(&self, name: &str) -> Result<Vec<VariableRef>> {
        Ok(self.database(name)?.nested_list())
    }

    // ------------------------------------------------------------------
    // Object lifecycle
    // ------------------------------------------------------------------

    /// Creates an uninitialized object, optionally under a parent frame.
    pub fn create_object(&self, parent: Option<&ObjectRef>) -> Result<ObjectRef> {
        if let Some(parent) = parent {
            parent.check_alive()?;
        }
        let (parent_id, depth) = match parent {
            Some(parent) => (Some(parent.id()), parent.depth() + 1),
            None => (None, 0),
        };
        let uid = self.shared.next_uid.fetch_add(1, Ordering::Relaxed);

        let mut objects = self.shared.objects.write().unwrap();
        let id = FrameId::new(objects.len() as u32);
        let object = Arc::new(Object::new(id, parent_id, depth, uid, self.time_mjd()));
        objects.push(Some(object.clone()));
        drop(objects);

        if let Some(parent) = parent {
            parent.raw_children.lock().unwrap().push(id);
        }
        Ok(object)
    }

    /// Finds or creates the sub-object of `origin` named
    /// `"<origin name> [<sub_name>]"` under the given parent.
    pub fn create_object_by(
        &self,
        origin: &ObjectRef,
        sub_name: &str,
        parent: Option<&ObjectRef>,
    ) -> Result<ObjectRef> {
        let full_name = format!("{} [{}]", origin.name(), sub_name);
        if let Ok(existing) = self.object_by_name(&full_name, parent) {
            return Ok(existing);
        }
        let object = self.create_object(parent)?;
        object.set_name(&full_name)?;
        Ok(object)
    }

    /// Initializes an object and its children. With `blocking = false` the
    /// work runs on a dedicated initializer thread and this call returns
    /// immediately.
    pub fn initialize_object(&self, object: &ObjectRef, blocking: bool) -> Result<()> {
        object.check_alive()?;
        if object.is_initialized() {
            return Err(Error::BadState("object was already initialized"));
        }
        if blocking {
            self.initialize_recursive(object)
        } else {
            let system = self.clone();
            let object = object.clone();
            thread::Builder::new()
                .name("vessim-init".to_string())
                .spawn(move || {
                    if let Err(error) = system.initialize_recursive(&object) {
                        warn!("initialization failed: {error}");
                    }
                })
                .map_err(|_| Error::Internal("could not spawn initializer thread"))?;
            Ok(())
        }
    }

    fn initialize_recursive(&self, object: &ObjectRef) -> Result<()> {
        let current = thread::current().id();
        *object.initialize_thread.lock().unwrap() = Some(current);

        // Initialize children depth-first. The list is re-scanned after
        // every child: initializers are allowed to add or remove siblings.
        loop {
            let next = {
                let raw = object.raw_children.lock().unwrap();
                raw.iter()
                    .copied()
                    .find(|id| match self.resolve(*id) {
                        Ok(child) => !child.is_initialized() && !child.is_destroyed(),
                        Err(_) => false,
                    })
            };
            let Some(child_id) = next else { break };
            let child = self.resolve(child_id)?;
            *child.initialize_thread.lock().unwrap() = Some(current);
            if let Err(error) = self.initialize_recursive(&child) {
                warn!("child '{}' failed to initialize: {error}", child.name());
                if !child.is_destroyed() {
                    let _ = self.destroy_object(&child);
                }
            }
        }

        // Offer the object to each solver until one claims it.
        let solvers = self.shared.solvers.read().unwrap().clone();
        for (index, solver) in solvers.iter().enumerate() {
            let hook_claim = {
                let hook = self.shared.on_initialize.read().unwrap();
                match &*hook {
                    Some(hook) => hook(self, solver.as_ref(), object),
                    None => Ok(Claim::Ignore),
                }
            };
            let claim = match hook_claim {
                Ok(Claim::Claimed) => Ok(Claim::Claimed),
                Ok(Claim::Ignore) => solver.on_initialize(self, object),
                Err(error) => Err(error),
            };
            match claim {
                Ok(Claim::Claimed) => {
                    *object.solver.lock().unwrap() = Some(index);
                    debug!("object '{}' claimed by solver #{index}", object.name());
                    break;
                }
                Ok(Claim::Ignore) => {}
                Err(error) => {
                    warn!(
                        "solver #{index} aborted initialization of '{}': {error}",
                        object.name()
                    );
                    let _ = self.destroy_object(object);
                    // The aborted object must still be cleanable
                    *object.initialize_thread.lock().unwrap() = None;
                    return Err(error);
                }
            }
        }

        // Any object with mass gets its rigid-body parameters derived.
        if let Err(error) = self.compute_mass_parameters(object) {
            if !matches!(error, Error::NotFound(_)) {
                warn!(
                    "mass parameters for '{}' not derived: {error}",
                    object.name()
                );
            }
        }

        object.initialized.store(true, Ordering::Release);

        // Publish to the by-type index
        let type_name = object.type_name();
        self.shared
            .type_index
            .lock()
            .unwrap()
            .entry(type_name)
            .or_default()
            .push(object.id());

        // Append to the parent's initialized-children list, establishing
        // this object's solve order slot.
        if let Some(parent_id) = object.parent_id() {
            if let Ok(parent) = self.resolve(parent_id) {
                parent.children.lock().unwrap().push(object.id());
            }
        }
        Ok(())
    }

    /// Derives the gyration-radius row `j<axis>` from `j<axis><axis>`,
    /// `i<axis><axis>` or `i<axis>`. Returns the row variable when only
    /// geometry can fill it.
    fn derive_gyration_row(
        &self,
        object: &ObjectRef,
        axis: char,
        mass: f64,
    ) -> Result<Option<VariableRef>> {
        let principal_j = object.float_value(&format!("j{axis}{axis}")).unwrap_or(0.0);
        let principal_i = object.float_value(&format!("i{axis}{axis}")).unwrap_or(0.0);
        let row_name = format!("j{axis}");

        let diagonal = |value: f64| {
            let mut vector = FrameVector::zero(DerivativeLevel::Position, object.id());
            match axis {
                'x' => vector.raw.x = value,
                'y' => vector.raw.y = value,
                _ => vector.raw.z = value,
            }
            vector
        };

        if principal_j > 0.0 {
            let row = object.add_variable(&row_name, VariableType::Vector)?;
            row.set_vector(&diagonal(principal_j))?;
            return Ok(None);
        }
        if object.get_variable(&row_name).is_ok() {
            return Ok(None);
        }

        let row = object.add_variable(&row_name, VariableType::Vector)?;
        if principal_i > 0.0 {
            row.set_vector(&diagonal(principal_i / mass))?;
            return Ok(None);
        }
        if let Ok(inertia_row) = object.get_variable(&format!("i{axis}")) {
            let mut vector = inertia_row.get_vector()?.scale(1.0 / mass);
            vector.frame = Some(object.id());
            row.set_vector(&vector)?;
            return Ok(None);
        }

        // Nothing specified; zero until geometry fills it in
        row.set_vector(&FrameVector::zero(DerivativeLevel::Position, object.id()))?;
        Ok(Some(row))
    }

    /// Fills in mass, center of mass and the gyration matrix for objects
    /// that declare a `mass` variable.
    fn compute_mass_parameters(&self, object: &ObjectRef) -> Result<()> {
        let mass_var = object.get_variable("mass")?;
        let mut mass = mass_var.get_float()?;
        if mass < EPS {
            warn!("object '{}' has non-positive mass, clamped", object.name());
            mass = EPS;
            mass_var.set_float(mass)?;
        }

        let need_x = self.derive_gyration_row(object, 'x', mass)?;
        let need_y = self.derive_gyration_row(object, 'y', mass)?;
        let need_z = self.derive_gyration_row(object, 'z', mass)?;

        let (cm_var, cm_missing) = match object.get_variable("cm") {
            Ok(existing) => (existing, false),
            Err(_) => {
                let added = object.add_variable("cm", VariableType::Vector)?;
                added.set_vector(&FrameVector::zero(DerivativeLevel::Position, object.id()))?;
                (added, true)
            }
        };

        if need_x.is_none() && need_y.is_none() && need_z.is_none() && !cm_missing {
            return Ok(());
        }
        let generator = self.shared.mesh_generator.read().unwrap();
        let Some(generator) = generator.as_ref() else {
            return Ok(());
        };

        // Coarse mesh is enough for mass-property estimates
        let mesh = generator.generate_mesh(object, 50.0)?;
        let weight = mesh.total_area + EPS;

        let mut center = nalgebra::Vector3::zeros();
        for triangle in &mesh.triangles {
            center += triangle.center * triangle.area;
        }
        center /= weight;

        if cm_missing {
            cm_var.set_vector(&FrameVector::from_raw(
                DerivativeLevel::Position,
                object.id(),
                center,
            ))?;
        } else {
            // Explicit center of mass wins; geometry only feeds the rows
            center = cm_var.get_vector()?.raw;
        }

        let mut jx = nalgebra::Vector3::zeros();
        let mut jy = nalgebra::Vector3::zeros();
        let mut jz = nalgebra::Vector3::zeros();
        for triangle in &mesh.triangles {
            let w = triangle.area;
            let r = triangle.center - center;
            jx += w * nalgebra::Vector3::new(r.y * r.y + r.z * r.z, -r.x * r.y, -r.x * r.z);
            jy += w * nalgebra::Vector3::new(-r.y * r.x, r.x * r.x + r.z * r.z, -r.y * r.z);
            jz += w * nalgebra::Vector3::new(-r.z * r.x, -r.z * r.y, r.x * r.x + r.y * r.y);
        }
        jx /= weight;
        jy /= weight;
        jz /= weight;

        for (need, raw) in [(need_x, jx), (need_y, jy), (need_z, jz)] {
            if let Some(row) = need {
                row.set_vector(&FrameVector::from_raw(
                    DerivativeLevel::Position,
                    object.id(),
                    raw,
                ))?;
            }
        }
        Ok(())
    }

    /// Logically removes an object: unlinks it everywhere, recursively
    /// destroys its children and queues it for cleanup. The allocation
    /// survives until [`System::cleanup_objects`] finds no live references.
    pub fn destroy_object(&self, object: &ObjectRef) -> Result<()> {
        object.check_alive()?;
        object.destroyed.store(true, Ordering::Release);

        if let Some(parent_id) = object.parent_id() {
            if let Ok(parent) = self.resolve(parent_id) {
                parent
                    .children
                    .lock()
                    .unwrap()
                    .retain(|id| *id != object.id());
                parent
                    .raw_children
                    .lock()
                    .unwrap()
                    .retain(|id| *id != object.id());
            }
        }

        if let Some(ids) = self
            .shared
            .type_index
            .lock()
            .unwrap()
            .get_mut(&object.type_name())
        {
            ids.retain(|id| *id != object.id());
        }

        let children: Vec<FrameId> = object.raw_children.lock().unwrap().clone();
        for child_id in children {
            if let Ok(child) = self.resolve(child_id) {
                if !child.is_destroyed() {
                    let _ = self.destroy_object(&child);
                }
            }
        }

        let solver_index = *object.solver.lock().unwrap();
        if let Some(index) = solver_index {
            let solver = self.shared.solvers.read().unwrap().get(index).cloned();
            if let Some(solver) = solver {
                if let Err(error) = solver.on_deinitialize(self, object) {
                    warn!("solver deinitialize of '{}' failed: {error}", object.name());
                }
            }
        }
        object.clear_solverdata();

        self.shared.deleted.lock().unwrap().push(object.id());
        Ok(())
    }

    /// Releases destroyed objects that nobody references any more.
    ///
    /// Safe to call from a dedicated thread; destruction and system
    /// shutdown are held off while a pass runs. Objects whose initializer
    /// thread is still working are skipped.
    pub fn cleanup_objects(&self) {
        let _guard = self.shared.cleanup_lock.lock().unwrap();
        loop {
            let mut released = 0usize;
            let pending: Vec<FrameId> = self.shared.deleted.lock().unwrap().clone();
            for id in pending {
                let removable = {
                    let objects = self.shared.objects.read().unwrap();
                    match objects.get(id.index()).and_then(|slot| slot.as_ref()) {
                        Some(object) => {
                            let initializing = !object.is_initialized()
                                && object.initialize_thread.lock().unwrap().is_some();
                            !initializing && Arc::strong_count(object) == 1
                        }
                        // Slot already retired
                        None => true,
                    }
                };
                if !removable {
                    continue;
                }
                let freed = {
                    let mut objects = self.shared.objects.write().unwrap();
                    match objects.get_mut(id.index()) {
                        Some(slot) => {
                            // Re-check under the write lock; a lookup may
                            // have cloned the reference meanwhile
                            let still_free = slot
                                .as_ref()
                                .map(|object| Arc::strong_count(object) == 1)
                                .unwrap_or(true);
                            if still_free {
                                *slot = None;
                            }
                            still_free
                        }
                        None => false,
                    }
                };
                if freed {
                    self.shared.deleted.lock().unwrap().retain(|d| *d != id);
                    released += 1;
                    debug!("released object {id}");
                }
            }
            if released == 0 {
                break;
            }
        }
    }

    /// Number of objects still allocated (live or awaiting cleanup).
    pub fn allocated_object_count(&self) -> usize {
        self.shared
            .objects
            .read()
            .unwrap()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    // ------------------------------------------------------------------
    // Tree navigation
    // ------------------------------------------------------------------

    pub fn get_parent(&self, object: &ObjectRef) -> Option<ObjectRef> {
        self.resolve(object.parent_id()?).ok()
    }

    /// Initialized children, in solve order.
    pub fn children(&self, object: &ObjectRef) -> Vec<ObjectRef> {
        let ids: Vec<FrameId> = object.children.lock().unwrap().clone();
        ids.into_iter()
            .filter_map(|id| self.resolve(id).ok())
            .filter(|child| !child.is_destroyed())
            .collect()
    }

    /// All children, including not-yet-initialized ones.
    pub fn all_children(&self, object: &ObjectRef) -> Vec<ObjectRef> {
        let ids: Vec<FrameId> = object.raw_children.lock().unwrap().clone();
        ids.into_iter()
            .filter_map(|id| self.resolve(id).ok())
            .filter(|child| !child.is_destroyed())
            .collect()
    }

    /// Moves an object within its parent's raw child list, in front of
    /// `head`, or to the head of the list when `head` is `None`. The
    /// initialized-children (solve) order is only rebuilt by a
    /// deinit/reinit cycle.
    pub fn move_in_list(&self, object: &ObjectRef, head: Option<&ObjectRef>) -> Result<()> {
        object.check_alive()?;
        let parent_id = object
            .parent_id()
            .ok_or(Error::BadParameter("object has no parent"))?;
        if let Some(head) = head {
            if head.parent_id() != Some(parent_id) {
                return Err(Error::BadParameter("head has a different parent"));
            }
        }
        let parent = self.resolve(parent_id)?;
        let mut raw = parent.raw_children.lock().unwrap();
        let from = raw
            .iter()
            .position(|id| *id == object.id())
            .ok_or(Error::BadState("object not found in parent list"))?;
        raw.remove(from);
        let to = match head {
            Some(head) => raw
                .iter()
                .position(|id| *id == head.id())
                .ok_or(Error::BadState("head not found in parent list"))?,
            None => 0,
        };
        raw.insert(to, object.id());
        Ok(())
    }

    /// Re-parents an object (and thereby its subtree). The state keeps its
    /// numerical components and is re-tagged to the new parent's frame;
    /// callers set a fresh state afterwards when the motion changes.
    pub fn set_parent(&self, object: &ObjectRef, new_parent: &ObjectRef) -> Result<()> {
        object.check_alive()?;
        new_parent.check_alive()?;
        if new_parent.id() == object.id() {
            return Err(Error::BadParameter("object cannot parent itself"));
        }

        if let Some(old_id) = object.parent_id() {
            if let Ok(old_parent) = self.resolve(old_id) {
                old_parent
                    .children
                    .lock()
                    .unwrap()
                    .retain(|id| *id != object.id());
                old_parent
                    .raw_children
                    .lock()
                    .unwrap()
                    .retain(|id| *id != object.id());
            }
        }

        new_parent.raw_children.lock().unwrap().push(object.id());
        if object.is_initialized() {
            new_parent.children.lock().unwrap().push(object.id());
        }
        {
            let mut links = object.links.write().unwrap();
            links.parent = Some(new_parent.id());
            links.depth = new_parent.depth() + 1;
        }
        self.refresh_depths(object)?;

        let mut state = object.state_vector();
        let frame = Some(new_parent.id());
        for component in [
            &mut state.position,
            &mut state.velocity,
            &mut state.acceleration,
            &mut state.angular_velocity,
            &mut state.angular_acceleration,
        ] {
            component.frame = frame;
            component.position_in = None;
            component.velocity_in = None;
        }
        state.orientation.frame = frame;
        object.set_state_vector(&state)
    }

    fn refresh_depths(&self, object: &ObjectRef) -> Result<()> {
        let depth = object.depth();
        let children: Vec<FrameId> = object.raw_children.lock().unwrap().clone();
        for child_id in children {
            if let Ok(child) = self.resolve(child_id) {
                child.links.write().unwrap().depth = depth + 1;
                self.refresh_depths(&child)?;
            }
        }
        Ok(())
    }

    /// Nearest frame, the object included, whose type begins with
    /// `propagator`; falls back to the root inertial space.
    pub fn parent_coordinate_system(&self, object: &ObjectRef) -> Result<ObjectRef> {
        object.check_alive()?;
        let mut current = object.clone();
        loop {
            if current.type_starts_with("propagator") {
                return Ok(current);
            }
            match current.parent_id() {
                Some(parent_id) => current = self.resolve(parent_id)?,
                None => return Ok(current),
            }
        }
    }

    /// Like [`System::parent_coordinate_system`], but the frame must also
    /// be at rest: zero linear and angular velocity.
    pub fn parent_inertial_coordinate_system(&self, object: &ObjectRef) -> Result<ObjectRef> {
        object.check_alive()?;
        let mut current = object.clone();
        loop {
            if current.type_starts_with("propagator") {
                let state = current.state_vector();
                let linear = state.velocity.raw.norm_squared();
                let angular = state.angular_velocity.raw.norm_squared();
                if linear <= EPS && angular <= EPS {
                    return Ok(current);
                }
            }
            match current.parent_id() {
                Some(parent_id) => current = self.resolve(parent_id)?,
                None => return Ok(current),
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    fn search_subtree(
        &self,
        root: &ObjectRef,
        matches: &dyn Fn(&ObjectRef) -> bool,
    ) -> Option<ObjectRef> {
        if root.is_destroyed() {
            return None;
        }
        if matches(root) {
            return Some(root.clone());
        }
        let children: Vec<FrameId> = root.raw_children.lock().unwrap().clone();
        for child_id in children {
            if let Ok(child) = self.resolve(child_id) {
                if let Some(found) = self.search_subtree(&child, matches) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn search(
        &self,
        within: Option<&ObjectRef>,
        matches: &dyn Fn(&ObjectRef) -> bool,
    ) -> Option<ObjectRef> {
        match within {
            Some(root) => self.search_subtree(root, matches),
            None => {
                let objects: Vec<ObjectRef> = self
                    .shared
                    .objects
                    .read()
                    .unwrap()
                    .iter()
                    .flatten()
                    .cloned()
                    .collect();
                objects
                    .into_iter()
                    .find(|object| !object.is_destroyed() && matches(object))
            }
        }
    }

    /// Finds an object by unique identifier, globally or within a subtree.
    /// Destroyed objects are never returned.
    pub fn object_by_uid(&self, uid: u32, within: Option<&ObjectRef>) -> Result<ObjectRef> {
        self.search(within, &|object| object.uid() == uid)
            .ok_or_else(|| Error::NotFound(format!("object uid {uid}")))
    }

    /// Finds an object by name, globally or within a subtree.
    pub fn object_by_name(&self, name: &str, within: Option<&ObjectRef>) -> Result<ObjectRef> {
        self.search(within, &|object| object.name() == name)
            .ok_or_else(|| Error::NotFound(format!("object '{name}'")))
    }

    /// All initialized, live objects of the given type.
    pub fn objects_by_type(&self, type_name: &str) -> Vec<ObjectRef> {
        let ids: Vec<FrameId> = self
            .shared
            .type_index
            .lock()
            .unwrap()
            .get(type_name)
            .cloned()
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| self.resolve(id).ok())
            .filter(|object| !object.is_destroyed())
            .collect()
    }

    // ------------------------------------------------------------------
    // Copying
    // ------------------------------------------------------------------

    /// Copies one object (without children) under a new parent. Frame
    /// references in variables pointing at the source or its parent are
    /// retargeted to the copy and the copy's parent; references to other
    /// frames are kept.
    pub fn copy_object_single(
        &self,
        source: &ObjectRef,
        parent: Option<&ObjectRef>,
    ) -> Result<ObjectRef> {
        let object = self.create_object(parent)?;
        object.set_name(&source.name())?;
        object.set_type(&source.type_name())?;

        let mut state = source.state_vector();
        let frame = object.parent_id();
        state.position.frame = frame;
        state.position.position_in = None;
        state.velocity.frame = frame;
        state.velocity.position_in = None;
        state.velocity.velocity_in = None;
        state.acceleration.frame = frame;
        state.acceleration.position_in = None;
        state.acceleration.velocity_in = None;
        state.orientation.frame = frame;
        state.angular_velocity.frame = frame;
        state.angular_velocity.position_in = None;
        state.angular_velocity.velocity_in = None;
        state.angular_acceleration.frame = frame;
        state.angular_acceleration.position_in = None;
        state.angular_acceleration.velocity_in = None;
        object.set_state_vector(&state)?;

        let remap = |id: Option<FrameId>| -> Option<FrameId> {
            match id {
                Some(id) if id == source.id() => Some(object.id()),
                Some(id) if Some(id) == source.parent_id() => object.parent_id(),
                other => other,
            }
        };

        for variable in source.variables() {
            let copy = variable.deep_copy();
            match copy.variable_type() {
                VariableType::Vector => {
                    let mut vector = copy.get_vector()?;
                    vector.frame = remap(vector.frame);
                    if let Some(p) = &mut vector.position_in {
                        p.frame = remap(Some(p.frame)).unwrap_or(p.frame);
                    }
                    if let Some(v) = &mut vector.velocity_in {
                        v.frame = remap(Some(v.frame)).unwrap_or(v.frame);
                    }
                    copy.set_vector(&vector)?;
                }
                VariableType::Quaternion => {
                    let mut quaternion = copy.get_quaternion()?;
                    quaternion.frame = remap(quaternion.frame);
                    copy.set_quaternion(&quaternion)?;
                }
                _ => {}
            }
            object.adopt_variable(copy);
        }
        Ok(object)
    }

    /// Deep copy of an object and its whole subtree under a new parent.
    pub fn copy_object(&self, source: &ObjectRef, parent: Option<&ObjectRef>) -> Result<ObjectRef> {
        let copy = self.copy_object_single(source, parent)?;
        let children: Vec<FrameId> = source.raw_children.lock().unwrap().clone();
        for child_id in children {
            if let Ok(child) = self.resolve(child_id) {
                if !child.is_destroyed() {
                    self.copy_object(&child, Some(&copy))?;
                }
            }
        }
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Path queries
    // ------------------------------------------------------------------

    /// Resolves a `/object/.../variable` dataref starting at `root`.
    /// Tokens match child objects first, then variables; once inside a
    /// variable, tokens match nested entries and then attributes.
    pub fn query_variable(&self, root: &ObjectRef, query: &str) -> Result<VariableRef> {
        root.check_alive()?;
        let mut object = root.clone();
        let mut variable: Option<VariableRef> = None;

        for token in query.split('/').filter(|token| !token.is_empty()) {
            if let Some(current) = &variable {
                let next = current
                    .get_nested(token)
                    .or_else(|_| current.get_attribute(token))?;
                variable = Some(next);
                continue;
            }
            let child = self
                .all_children(&object)
                .into_iter()
                .find(|child| child.name() == token);
            if let Some(child) = child {
                object = child;
                continue;
            }
            variable = Some(object.get_variable(token)?);
        }
        variable.ok_or_else(|| Error::NotFound(query.to_string()))
    }

    // ------------------------------------------------------------------
    // Solve / integrate dispatch
    // ------------------------------------------------------------------

    /// Advances an object by `delta_time` through its solve callback:
    /// the per-object override, the claimed solver, or the default that
    /// recurses into children.
    pub fn solve_object(&self, object: &ObjectRef, delta_time: f64) -> Result<()> {
        object.check_alive()?;
        if !object.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let override_callback = object.solve_override.lock().unwrap().clone();
        if let Some(callback) = override_callback {
            return callback(self, object, delta_time);
        }
        let solver = self.claimed_solver(object);
        if let Some(solver) = solver {
            return solver.on_solve(self, object, delta_time);
        }
        default_solve(self, object, delta_time)
    }

    /// Computes the state derivative of an object for a hypothetical
    /// state (or its current public state when `state` is `None`).
    ///
    /// While the callback runs, the calling thread is registered as the
    /// object's integrator thread and conversions on this thread see the
    /// hypothetical state instead of the public one.
    pub fn integrate_object(
        &self,
        object: &ObjectRef,
        delta_time: f64,
        state: Option<&StateVector>,
    ) -> Result<StateDerivative> {
        object.check_alive()?;
        if !object.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let passed = match state {
            Some(state) => *state,
            None => object.state_vector(),
        };
        object.set_private_state(&passed);
        *object.integrate_thread.lock().unwrap() = Some(thread::current().id());

        let result = (|| {
            let override_callback = object.integrate_override.lock().unwrap().clone();
            if let Some(callback) = override_callback {
                return callback(self, object, delta_time, &passed);
            }
            if let Some(solver) = self.claimed_solver(object) {
                return solver.on_integrate(self, object, delta_time, &passed);
            }
            Ok(default_integrate(&passed))
        })();

        *object.integrate_thread.lock().unwrap() = None;
        result
    }

    fn claimed_solver(&self, object: &ObjectRef) -> Option<Arc<dyn Solver>> {
        let index = (*object.solver.lock().unwrap())?;
        self.shared.solvers.read().unwrap().get(index).cloned()
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}
