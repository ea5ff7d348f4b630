//! Frames ("objects") of the coordinate-system tree.
//!
//! An object carries its state expressed in its parent's frame, an ordered
//! variable bag, and the solver binding established during initialization.
//! Objects live in the system arena as `Arc` slots; an [`ObjectRef`] held
//! by the embedder keeps the allocation alive across destruction until the
//! cleanup pass runs.

use crate::error::{Error, Result};
use crate::system::System;
use crate::variable::{VariableRef, VariableType};
use frame_algebra::{FrameId, StateDerivative, StateVector};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, ThreadId};

pub type ObjectRef = Arc<Object>;

/// Per-object solve override: advances the object's internal state by the
/// time step.
pub type SolveFn = Arc<dyn Fn(&System, &ObjectRef, f64) -> Result<()> + Send + Sync>;

/// Per-object integrate override: returns the state derivative for a
/// hypothetical state without committing it.
pub type IntegrateFn =
    Arc<dyn Fn(&System, &ObjectRef, f64, &StateVector) -> Result<StateDerivative> + Send + Sync>;

pub(crate) struct Links {
    pub parent: Option<FrameId>,
    pub depth: u32,
}

pub struct Object {
    id: FrameId,
    uid: AtomicU32,
    type_name: RwLock<String>,
    name: RwLock<String>,
    pub(crate) links: RwLock<Links>,
    /// Initialized children, in solve order.
    pub(crate) children: Mutex<Vec<FrameId>>,
    /// All children including the not-yet-initialized ones.
    pub(crate) raw_children: Mutex<Vec<FrameId>>,

    state: RwLock<StateVector>,
    previous_state: RwLock<StateVector>,
    private_state: RwLock<StateVector>,
    render_state: RwLock<StateVector>,

    variables: Mutex<Vec<VariableRef>>,

    /// Index of the claiming solver in the system registry.
    pub(crate) solver: Mutex<Option<usize>>,
    pub(crate) solve_override: Mutex<Option<SolveFn>>,
    pub(crate) integrate_override: Mutex<Option<IntegrateFn>>,
    userdata: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    solverdata: Mutex<Option<Arc<dyn Any + Send + Sync>>>,

    create_thread: Mutex<ThreadId>,
    pub(crate) initialize_thread: Mutex<Option<ThreadId>>,
    pub(crate) integrate_thread: Mutex<Option<ThreadId>>,
    render_thread: Mutex<Option<ThreadId>>,

    pub(crate) initialized: AtomicBool,
    pub(crate) destroyed: AtomicBool,
}

impl Object {
    pub(crate) fn new(id: FrameId, parent: Option<FrameId>, depth: u32, uid: u32, time: f64) -> Self {
        let mut state = StateVector::new(parent);
        state.time = time;
        Self {
            id,
            uid: AtomicU32::new(uid),
            type_name: RwLock::new(String::new()),
            name: RwLock::new(String::new()),
            links: RwLock::new(Links { parent, depth }),
            children: Mutex::new(Vec::new()),
            raw_children: Mutex::new(Vec::new()),
            state: RwLock::new(state),
            previous_state: RwLock::new(state),
            private_state: RwLock::new(state),
            render_state: RwLock::new(state),
            variables: Mutex::new(Vec::new()),
            solver: Mutex::new(None),
            solve_override: Mutex::new(None),
            integrate_override: Mutex::new(None),
            userdata: Mutex::new(None),
            solverdata: Mutex::new(None),
            create_thread: Mutex::new(thread::current().id()),
            initialize_thread: Mutex::new(None),
            integrate_thread: Mutex::new(None),
            render_thread: Mutex::new(None),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Frame handle of this object.
    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn uid(&self) -> u32 {
        self.uid.load(Ordering::Relaxed)
    }

    pub fn set_uid(&self, uid: u32) -> Result<()> {
        self.check_alive()?;
        self.uid.store(uid, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn check_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::InvalidObject);
        }
        Ok(())
    }

    /// Pre-initialization mutation is restricted to the creating thread or
    /// the thread running this object's initialization.
    fn check_init_access(&self) -> Result<()> {
        self.check_alive()?;
        if self.is_initialized() {
            return Err(Error::BadState("object was already initialized"));
        }
        let current = thread::current().id();
        if current != *self.create_thread.lock().unwrap()
            && Some(current) != *self.initialize_thread.lock().unwrap()
        {
            return Err(Error::InterthreadCall);
        }
        Ok(())
    }

    /// Hands the pre-initialization mutation right to the calling thread.
    pub fn transfer_initialization(&self) -> Result<()> {
        self.check_alive()?;
        if self.is_initialized() {
            return Err(Error::BadState("object was already initialized"));
        }
        *self.create_thread.lock().unwrap() = thread::current().id();
        Ok(())
    }

    pub fn type_name(&self) -> String {
        self.type_name.read().unwrap().clone()
    }

    pub fn set_type(&self, type_name: &str) -> Result<()> {
        self.check_init_access()?;
        *self.type_name.write().unwrap() = type_name.chars().take(256).collect();
        Ok(())
    }

    /// Whether the object is exactly of the given type.
    pub fn check_type(&self, type_name: &str) -> Result<()> {
        self.check_alive()?;
        if *self.type_name.read().unwrap() == type_name {
            Ok(())
        } else {
            Err(Error::InvalidType("object type mismatch"))
        }
    }

    pub fn type_starts_with(&self, prefix: &str) -> bool {
        self.type_name.read().unwrap().starts_with(prefix)
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap().clone()
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.check_init_access()?;
        *self.name.write().unwrap() = name.chars().take(256).collect();
        Ok(())
    }

    /// Gives the object a generated name unique to its uid.
    pub fn set_unique_name(&self) -> Result<()> {
        self.check_init_access()?;
        *self.name.write().unwrap() = format!("@{:08X}", self.uid());
        Ok(())
    }

    pub fn parent_id(&self) -> Option<FrameId> {
        self.links.read().unwrap().parent
    }

    pub(crate) fn depth(&self) -> u32 {
        self.links.read().unwrap().depth
    }

    /// Public state as seen by non-integrating threads.
    ///
    /// The returned velocity and acceleration components carry the
    /// object's position (and velocity) as their acting point, so
    /// converting them through rotating frames picks up the correct
    /// transport terms.
    pub fn state_vector(&self) -> StateVector {
        let mut vector = *self.state.read().unwrap();
        vector.velocity.set_position_vector(&vector.position);
        vector.acceleration.set_position_vector(&vector.position);
        vector.angular_velocity.set_position_vector(&vector.position);
        vector.angular_acceleration.set_position_vector(&vector.position);

        vector.acceleration.set_velocity_vector(&vector.velocity);
        vector.angular_velocity.set_velocity_vector(&vector.velocity);
        vector.angular_acceleration.set_velocity_vector(&vector.velocity);
        vector
    }

    /// State as of the most recent `set_state_vector`.
    pub fn previous_state_vector(&self) -> StateVector {
        *self.previous_state.read().unwrap()
    }

    /// Linear blend between the previous and current state, `t` in [0, 1].
    pub fn interpolated_state_vector(&self, t: f64) -> StateVector {
        let previous = self.previous_state_vector();
        let current = self.state_vector();
        StateVector::interpolate(&previous, &current, t)
    }

    /// Publishes a new state, snapshotting the old one as previous.
    ///
    /// Lock order is current then previous, so readers never observe a
    /// previous state newer than the current one.
    pub fn set_state_vector(&self, vector: &StateVector) -> Result<()> {
        self.check_alive()?;
        {
            let mut state = self.state.write().unwrap();
            let mut previous = self.previous_state.write().unwrap();
            *previous = *state;
            *state = *vector;
        }
        *self.private_state.write().unwrap() = *vector;
        Ok(())
    }

    pub(crate) fn set_private_state(&self, vector: &StateVector) {
        *self.private_state.write().unwrap() = *vector;
    }

    /// Stores an interpolated snapshot for the calling render thread.
    /// Conversions made from that thread afterwards see this snapshot
    /// instead of the live public state.
    pub fn set_render_state_vector(&self, t: f64) -> Result<()> {
        self.check_alive()?;
        let interpolated = self.interpolated_state_vector(t);
        *self.render_state.write().unwrap() = interpolated;
        *self.render_thread.lock().unwrap() = Some(thread::current().id());
        Ok(())
    }

    /// State the calling thread should use for coordinate conversions:
    /// the integrator-private copy on the thread currently integrating
    /// this object, the render snapshot on the render thread, the public
    /// state everywhere else.
    pub(crate) fn state_for_current_thread(&self) -> StateVector {
        let current = thread::current().id();
        if *self.integrate_thread.lock().unwrap() == Some(current) {
            return *self.private_state.read().unwrap();
        }
        if *self.render_thread.lock().unwrap() == Some(current) {
            return *self.render_state.read().unwrap();
        }
        *self.state.read().unwrap()
    }

    /// Adds a variable of the given type; returns the existing variable if
    /// the name is already present. Pre-initialization only.
    pub fn add_variable(&self, name: &str, variable_type: VariableType) -> Result<VariableRef> {
        self.check_init_access()?;
        let mut variables = self.variables.lock().unwrap();
        if let Some(existing) = variables.iter().find(|v| v.name() == name) {
            return Ok(existing.clone());
        }
        let variable = Arc::new(crate::variable::Variable::new(name, variable_type));
        variables.push(variable.clone());
        Ok(variable)
    }

    /// Adds a float variable with a default value. The existing value is
    /// kept when the variable is already defined (values loaded from a
    /// vessel description win over code defaults).
    pub fn add_float(&self, name: &str, value: f64) -> Result<VariableRef> {
        if let Ok(existing) = self.get_variable(name) {
            return Ok(existing);
        }
        let variable = self.add_variable(name, VariableType::Float)?;
        variable.set_float(value)?;
        Ok(variable)
    }

    pub fn get_variable(&self, name: &str) -> Result<VariableRef> {
        self.check_alive()?;
        self.variables
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.name() == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Float value of a variable, `None` when absent or not a float.
    pub fn float_value(&self, name: &str) -> Option<f64> {
        self.get_variable(name).ok()?.get_float().ok()
    }

    pub fn variables(&self) -> Vec<VariableRef> {
        self.variables.lock().unwrap().clone()
    }

    /// Appends an already-built variable (used when copying objects).
    pub(crate) fn adopt_variable(&self, variable: VariableRef) {
        let mut variables = self.variables.lock().unwrap();
        if variables.iter().any(|v| v.name() == variable.name()) {
            return;
        }
        variables.push(variable);
    }

    pub fn remove_variable(&self, name: &str) -> Result<()> {
        self.check_init_access()?;
        let mut variables = self.variables.lock().unwrap();
        let index = variables
            .iter()
            .position(|v| v.name() == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        variables.remove(index);
        Ok(())
    }

    pub fn move_variable_in_list(&self, name: &str, to_head: bool) -> Result<()> {
        self.check_alive()?;
        let mut variables = self.variables.lock().unwrap();
        let index = variables
            .iter()
            .position(|v| v.name() == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let entry = variables.remove(index);
        if to_head {
            variables.insert(0, entry);
        } else {
            variables.push(entry);
        }
        Ok(())
    }

    pub fn set_userdata(&self, data: Arc<dyn Any + Send + Sync>) -> Result<()> {
        self.check_alive()?;
        *self.userdata.lock().unwrap() = Some(data);
        Ok(())
    }

    pub fn userdata<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.userdata
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::NotFound("userdata".to_string()))?
            .downcast::<T>()
            .map_err(|_| Error::InvalidType("userdata payload type"))
    }

    pub fn set_solverdata(&self, data: Arc<dyn Any + Send + Sync>) -> Result<()> {
        self.check_alive()?;
        *self.solverdata.lock().unwrap() = Some(data);
        Ok(())
    }

    pub fn solverdata<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.solverdata
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::NotFound("solverdata".to_string()))?
            .downcast::<T>()
            .map_err(|_| Error::InvalidType("solverdata payload type"))
    }

    pub(crate) fn clear_solverdata(&self) {
        *self.solverdata.lock().unwrap() = None;
    }

    /// Installs a per-object solve callback, overriding the claimed
    /// solver's.
    pub fn set_on_solve(&self, callback: Option<SolveFn>) -> Result<()> {
        self.check_alive()?;
        *self.solve_override.lock().unwrap() = callback;
        Ok(())
    }

    /// Installs a per-object integrate callback, overriding the claimed
    /// solver's.
    pub fn set_on_integrate(&self, callback: Option<IntegrateFn>) -> Result<()> {
        self.check_alive()?;
        *self.integrate_override.lock().unwrap() = callback;
        Ok(())
    }
}
