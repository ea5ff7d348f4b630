//! Vessel-dynamics simulation kernel.
//!
//! The kernel propagates the translational and rotational state of an
//! arbitrary tree of frames ("objects") under forces and torques produced
//! by registered solvers. It provides:
//!
//! - the coordinate-system tree with per-object state snapshots
//!   (public / previous / integrator-private / render),
//! - frame conversions with full non-inertial coupling (Coriolis,
//!   centripetal, angular-acceleration and transport-velocity terms),
//! - a typed variable store attached to every frame,
//! - a claim-based solver registry with solve/integrate dispatch,
//! - parallel object initialization and deferred destruction.
//!
//! Object handles ([`ObjectRef`]) are shared references: cloning one is
//! the "store" operation that keeps a destroyed object's memory alive, and
//! dropping the clone releases it. [`System::cleanup_objects`] reclaims
//! destroyed objects once only the system itself still references them.

mod error;
mod kinematics;
mod mesh;
mod object;
mod solver;
mod system;
mod variable;

pub use error::{Claim, Error, Result};
pub use frame_algebra::{
    DerivativeLevel, FrameId, FramePoint, FrameQuaternion, FrameVector, StateDerivative,
    StateVector, Tensor, EPS,
};
pub use kinematics::MAX_CONVERT_DEPTH;
pub use mesh::{BoundingBox, Mesh, MeshGenerator, MeshTriangle};
pub use object::{IntegrateFn, Object, ObjectRef, SolveFn};
pub use solver::{InitializeHook, Solver};
pub use system::{SimTime, System};
pub use variable::{Function1D, Value, Variable, VariableRef, VariableType};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Claims objects of one type and counts lifecycle callbacks.
    struct TypeSolver {
        claim_type: &'static str,
        claimed: AtomicUsize,
        deinitialized: AtomicUsize,
    }

    impl TypeSolver {
        fn new(claim_type: &'static str) -> Arc<Self> {
            Arc::new(Self {
                claim_type,
                claimed: AtomicUsize::new(0),
                deinitialized: AtomicUsize::new(0),
            })
        }
    }

    impl Solver for TypeSolver {
        fn on_initialize(&self, _system: &System, object: &ObjectRef) -> Result<Claim> {
            if object.check_type(self.claim_type).is_err() {
                return Ok(Claim::Ignore);
            }
            self.claimed.fetch_add(1, Ordering::SeqCst);
            Ok(Claim::Claimed)
        }

        fn on_deinitialize(&self, _system: &System, _object: &ObjectRef) -> Result<()> {
            self.deinitialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_claim_protocol_first_claim_wins() {
        let system = System::new();
        let first = TypeSolver::new("vessel");
        let second = TypeSolver::new("vessel");
        system.register_solver(first.clone()).unwrap();
        system.register_solver(second.clone()).unwrap();

        let object = system.create_object(Some(&system.root())).unwrap();
        object.set_type("vessel").unwrap();
        system.initialize_object(&object, true).unwrap();

        assert_eq!(first.claimed.load(Ordering::SeqCst), 1);
        assert_eq!(second.claimed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unclaimed_object_uses_default_callbacks() {
        let system = System::new();
        let object = system.create_object(Some(&system.root())).unwrap();
        object.set_type("frame").unwrap();
        system.initialize_object(&object, true).unwrap();

        // Default solve succeeds with no children; default integrate
        // mirrors the state
        system.solve_object(&object, 1.0).unwrap();
        let mut state = object.state_vector();
        state.velocity.raw.x = 3.25;
        let derivative = system.integrate_object(&object, 0.0, Some(&state)).unwrap();
        assert_abs_diff_eq!(derivative.velocity.raw.x, 3.25, epsilon = 1e-12);
    }

    #[test]
    fn test_initialization_is_depth_first() {
        let system = System::new();
        let root = system.root();
        let parent = system.create_object(Some(&root)).unwrap();
        parent.set_type("vessel").unwrap();
        let child = system.create_object(Some(&parent)).unwrap();
        child.set_type("vessel").unwrap();

        let solver = TypeSolver::new("vessel");
        system.register_solver(solver.clone()).unwrap();
        system.initialize_object(&parent, true).unwrap();

        assert!(child.is_initialized());
        assert!(parent.is_initialized());
        assert_eq!(solver.claimed.load(Ordering::SeqCst), 2);
        // Child appears in the parent's initialized-children list
        assert_eq!(system.children(&parent).len(), 1);
    }

    #[test]
    fn test_nonblocking_initialization() {
        let system = System::new();
        let object = system.create_object(Some(&system.root())).unwrap();
        object.set_type("frame").unwrap();
        system.initialize_object(&object, false).unwrap();
        while !object.is_initialized() {
            std::thread::yield_now();
        }
        assert!(object.is_initialized());
    }

    #[test]
    fn test_variable_mutation_after_init_is_rejected() {
        let system = System::new();
        let object = system.create_object(Some(&system.root())).unwrap();
        object.add_float("mass", 100.0).unwrap();
        system.initialize_object(&object, true).unwrap();

        assert!(matches!(
            object.add_variable("late", VariableType::Float),
            Err(Error::BadState(_))
        ));
        assert!(matches!(object.set_type("other"), Err(Error::BadState(_))));
        // Values of existing variables stay mutable
        object.get_variable("mass").unwrap().set_float(90.0).unwrap();
    }

    #[test]
    fn test_variable_mutation_from_foreign_thread_is_rejected() {
        let system = System::new();
        let object = system.create_object(Some(&system.root())).unwrap();

        let handle = {
            let object = object.clone();
            std::thread::spawn(move || object.add_variable("mass", VariableType::Float))
        };
        assert!(matches!(
            handle.join().unwrap(),
            Err(Error::InterthreadCall)
        ));

        // Handoff transfers the mutation right
        let handle = {
            let object = object.clone();
            std::thread::spawn(move || {
                object.transfer_initialization()?;
                object.add_variable("mass", VariableType::Float).map(|_| ())
            })
        };
        assert!(handle.join().unwrap().is_ok());
    }

    #[test]
    fn test_mass_clamped_to_epsilon() {
        let system = System::new();
        let object = system.create_object(Some(&system.root())).unwrap();
        object.add_float("mass", 0.0).unwrap();
        system.initialize_object(&object, true).unwrap();
        let mass = object.float_value("mass").unwrap();
        assert!(mass > 0.0);
        assert!(mass <= EPS);
    }

    #[test]
    fn test_inertia_derived_from_principal_moments() {
        let system = System::new();
        let object = system.create_object(Some(&system.root())).unwrap();
        object.add_float("mass", 200.0).unwrap();
        object.add_float("ixx", 400.0).unwrap();
        object.add_float("iyy", 600.0).unwrap();
        object.add_float("izz", 800.0).unwrap();
        system.initialize_object(&object, true).unwrap();

        let jx = object.get_variable("jx").unwrap().get_vector().unwrap();
        let jy = object.get_variable("jy").unwrap().get_vector().unwrap();
        let jz = object.get_variable("jz").unwrap().get_vector().unwrap();
        assert_abs_diff_eq!(jx.raw.x, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(jy.raw.y, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(jz.raw.z, 4.0, epsilon = 1e-12);
        assert!(object.get_variable("cm").is_ok());
    }

    #[test]
    fn test_lookup_by_uid_name_and_type() {
        let system = System::new();
        let root = system.root();
        let object = system.create_object(Some(&root)).unwrap();
        object.set_type("planet").unwrap();
        object.set_name("Earth").unwrap();
        object.set_uid(777).unwrap();
        system.initialize_object(&object, true).unwrap();

        assert_eq!(system.object_by_uid(777, None).unwrap().id(), object.id());
        assert_eq!(
            system.object_by_name("Earth", Some(&root)).unwrap().id(),
            object.id()
        );
        assert_eq!(system.objects_by_type("planet").len(), 1);
        assert!(system.object_by_uid(778, None).is_err());
    }

    #[test]
    fn test_destroyed_objects_disappear_from_lookups() {
        let system = System::new();
        let root = system.root();
        let object = system.create_object(Some(&root)).unwrap();
        object.set_type("planet").unwrap();
        object.set_name("Doomed").unwrap();
        system.initialize_object(&object, true).unwrap();

        system.destroy_object(&object).unwrap();
        assert!(system.objects_by_type("planet").is_empty());
        assert!(system.object_by_name("Doomed", None).is_err());
        assert!(system.children(&root).is_empty());
        assert!(matches!(
            system.solve_object(&object, 1.0),
            Err(Error::InvalidObject)
        ));
    }

    #[test]
    fn test_destroy_and_cleanup_with_stored_references() {
        let system = System::new();
        let root = system.root();
        let baseline = system.allocated_object_count();

        let mut stored = Vec::new();
        let mut all = Vec::new();
        for i in 0..100 {
            let object = system.create_object(Some(&root)).unwrap();
            object.set_type("frame").unwrap();
            system.initialize_object(&object, true).unwrap();
            if i < 10 {
                stored.push(object.clone());
            }
            all.push(object);
        }
        assert_eq!(system.allocated_object_count(), baseline + 100);

        for object in &all {
            if !object.is_destroyed() {
                system.destroy_object(object).unwrap();
            }
        }
        drop(all);
        system.cleanup_objects();
        assert_eq!(system.allocated_object_count(), baseline + 10);

        drop(stored);
        system.cleanup_objects();
        assert_eq!(system.allocated_object_count(), baseline);
    }

    #[test]
    fn test_destruction_cascades_and_deinitializes() {
        let system = System::new();
        let solver = TypeSolver::new("vessel");
        system.register_solver(solver.clone()).unwrap();

        let parent = system.create_object(Some(&system.root())).unwrap();
        parent.set_type("vessel").unwrap();
        let child = system.create_object(Some(&parent)).unwrap();
        child.set_type("vessel").unwrap();
        system.initialize_object(&parent, true).unwrap();

        system.destroy_object(&parent).unwrap();
        assert!(child.is_destroyed());
        assert_eq!(solver.deinitialized.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_state_snapshot_and_interpolation() {
        let system = System::new();
        let object = system.create_object(Some(&system.root())).unwrap();
        system.initialize_object(&object, true).unwrap();

        let mut state = object.state_vector();
        state.position.raw.x = 10.0;
        object.set_state_vector(&state).unwrap();
        state.position.raw.x = 20.0;
        object.set_state_vector(&state).unwrap();

        assert_abs_diff_eq!(
            object.previous_state_vector().position.raw.x,
            10.0,
            epsilon = 1e-12
        );
        let mid = object.interpolated_state_vector(0.5);
        assert_abs_diff_eq!(mid.position.raw.x, 15.0, epsilon = 1e-12);
        let at0 = object.interpolated_state_vector(0.0);
        assert_abs_diff_eq!(at0.position.raw.x, 10.0, epsilon = 1e-12);
        let at1 = object.interpolated_state_vector(1.0);
        assert_abs_diff_eq!(at1.position.raw.x, 20.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parent_coordinate_system_walk() {
        let system = System::new();
        let root = system.root();
        let propagator = system.create_object(Some(&root)).unwrap();
        propagator.set_type("propagator_rk4").unwrap();
        let vessel = system.create_object(Some(&propagator)).unwrap();
        vessel.set_type("vessel").unwrap();
        let engine = system.create_object(Some(&vessel)).unwrap();
        engine.set_type("engine").unwrap();
        system.initialize_object(&propagator, true).unwrap();

        let anchor = system.parent_coordinate_system(&engine).unwrap();
        assert_eq!(anchor.id(), propagator.id());
        // No propagator above the root: falls back to the root itself
        let from_root = system.parent_coordinate_system(&root).unwrap();
        assert_eq!(from_root.id(), root.id());

        let inertial = system.parent_inertial_coordinate_system(&engine).unwrap();
        assert_eq!(inertial.id(), propagator.id());
    }

    #[test]
    fn test_copy_single_remaps_frames() {
        let system = System::new();
        let root = system.root();
        let source = system.create_object(Some(&root)).unwrap();
        source.set_name("probe").unwrap();
        source.set_type("vessel").unwrap();
        let cm = source.add_variable("cm", VariableType::Vector).unwrap();
        cm.set_vector(&FrameVector::new(
            DerivativeLevel::Position,
            source.id(),
            0.5,
            0.0,
            0.0,
        ))
        .unwrap();
        system.initialize_object(&source, true).unwrap();

        let copy = system.copy_object_single(&source, Some(&root)).unwrap();
        assert_eq!(copy.name(), "probe");
        assert_ne!(copy.uid(), source.uid());
        let copied_cm = copy.get_variable("cm").unwrap().get_vector().unwrap();
        assert_eq!(copied_cm.frame, Some(copy.id()));
        assert_abs_diff_eq!(copied_cm.raw.x, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_copy_subtree() {
        let system = System::new();
        let root = system.root();
        let source = system.create_object(Some(&root)).unwrap();
        source.set_name("stage").unwrap();
        let child = system.create_object(Some(&source)).unwrap();
        child.set_name("tank").unwrap();
        system.initialize_object(&source, true).unwrap();

        let copy = system.copy_object(&source, Some(&root)).unwrap();
        let copied_children = system.all_children(&copy);
        assert_eq!(copied_children.len(), 1);
        assert_eq!(copied_children[0].name(), "tank");
        assert_ne!(copied_children[0].id(), child.id());
    }

    #[test]
    fn test_path_query() {
        let system = System::new();
        let root = system.root();
        let earth = system.create_object(Some(&root)).unwrap();
        earth.set_name("Earth").unwrap();
        earth.add_float("mass", 5.97e24).unwrap();
        let geometry = earth
            .add_variable("geometry", VariableType::Nested)
            .unwrap();
        let sections = geometry.add_nested("cross_sections", VariableType::Nested);
        sections.add_nested("section", VariableType::Float);
        system.initialize_object(&earth, true).unwrap();

        let mass = system.query_variable(&root, "/Earth/mass").unwrap();
        assert_abs_diff_eq!(mass.get_float().unwrap(), 5.97e24, epsilon = 1e10);

        let section = system
            .query_variable(&root, "/Earth/geometry/cross_sections/section")
            .unwrap();
        assert_eq!(section.name(), "section");

        assert!(system.query_variable(&root, "/Earth/nope").is_err());
    }

    #[test]
    fn test_create_by_reuses_existing() {
        let system = System::new();
        let root = system.root();
        let vessel = system.create_object(Some(&root)).unwrap();
        vessel.set_name("lander").unwrap();

        let gimbal = system
            .create_object_by(&vessel, "gimbal", Some(&root))
            .unwrap();
        assert_eq!(gimbal.name(), "lander [gimbal]");
        let again = system
            .create_object_by(&vessel, "gimbal", Some(&root))
            .unwrap();
        assert_eq!(gimbal.id(), again.id());
    }

    #[test]
    fn test_global_initialize_hook_can_claim() {
        let system = System::new();
        let solver = TypeSolver::new("never_matches");
        system.register_solver(solver.clone()).unwrap();
        system.set_on_initialize(Some(Box::new(|_system, _solver, object: &ObjectRef| {
            if object.check_type("special").is_ok() {
                Ok(Claim::Claimed)
            } else {
                Ok(Claim::Ignore)
            }
        })));

        let object = system.create_object(Some(&system.root())).unwrap();
        object.set_type("special").unwrap();
        system.initialize_object(&object, true).unwrap();

        // Hook claimed for the solver; the solver's own claim counter
        // stays untouched
        assert_eq!(solver.claimed.load(Ordering::SeqCst), 0);
        assert!(object.is_initialized());
    }

    #[test]
    fn test_solve_override_takes_precedence() {
        let system = System::new();
        let object = system.create_object(Some(&system.root())).unwrap();
        system.initialize_object(&object, true).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        object
            .set_on_solve(Some(Arc::new(move |_system, _object, _dt| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
            .unwrap();
        system.solve_object(&object, 0.25).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    /// Rejects every object offered to it.
    struct RejectingSolver;

    impl Solver for RejectingSolver {
        fn on_initialize(&self, _system: &System, _object: &ObjectRef) -> Result<Claim> {
            Err(Error::BadParameter("solver cannot handle this object"))
        }
    }

    #[test]
    fn test_claim_error_destroys_object() {
        let system = System::new();
        system.register_solver(Arc::new(RejectingSolver)).unwrap();
        let object = system.create_object(Some(&system.root())).unwrap();
        object.set_type("vessel").unwrap();

        assert!(system.initialize_object(&object, true).is_err());
        assert!(object.is_destroyed());
        assert!(!object.is_initialized());
    }

    #[test]
    fn test_render_thread_sees_snapshot() {
        let system = System::new();
        let object = system.create_object(Some(&system.root())).unwrap();
        system.initialize_object(&object, true).unwrap();

        let mut state = object.state_vector();
        state.position.raw.x = 100.0;
        object.set_state_vector(&state).unwrap();
        state.position.raw.x = 200.0;
        object.set_state_vector(&state).unwrap();

        // Freeze the halfway blend for this (render) thread; conversions
        // now see the snapshot instead of the live public state
        object.set_render_state_vector(0.5).unwrap();
        let origin = FrameVector::zero(DerivativeLevel::Position, object.id());
        let in_root = system.convert_vector(&origin, system.root_id()).unwrap();
        assert_abs_diff_eq!(in_root.raw.x, 150.0, epsilon = 1e-12);
    }

    #[test]
    fn test_simulation_time_modes() {
        let system = System::new();
        system.set_time(59000.5);
        assert_abs_diff_eq!(system.time_mjd(), 59000.5, epsilon = 1e-12);
        system.set_realtime();
        // Wall clock MJD is after 2020-01-01 (MJD 58849)
        assert!(system.time_mjd() > 58849.0);
    }

    #[test]
    fn test_databases() {
        let system = System::new();
        let materials = system.add_database("material");
        let steel = materials.add_nested("steel", VariableType::Nested);
        steel.add_attribute("density", VariableType::Float);

        assert_eq!(system.database_entries("material").unwrap().len(), 1);
        assert!(system.database("nonexistent").is_err());
        // Idempotent add
        assert_eq!(system.add_database("material").name(), "material");
    }

    #[test]
    fn test_move_in_list_reorders_raw_children() {
        let system = System::new();
        let root = system.root();
        let parent = system.create_object(Some(&root)).unwrap();
        let a = system.create_object(Some(&parent)).unwrap();
        a.set_name("a").unwrap();
        let b = system.create_object(Some(&parent)).unwrap();
        b.set_name("b").unwrap();
        let c = system.create_object(Some(&parent)).unwrap();
        c.set_name("c").unwrap();

        system.move_in_list(&c, Some(&a)).unwrap();
        let names: Vec<String> = system
            .all_children(&parent)
            .iter()
            .map(|child| child.name())
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        system.move_in_list(&b, None).unwrap();
        let names: Vec<String> = system
            .all_children(&parent)
            .iter()
            .map(|child| child.name())
            .collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_set_parent_moves_subtree() {
        let system = System::new();
        let root = system.root();
        let a = system.create_object(Some(&root)).unwrap();
        let b = system.create_object(Some(&root)).unwrap();
        let child = system.create_object(Some(&a)).unwrap();
        let grandchild = system.create_object(Some(&child)).unwrap();

        system.set_parent(&child, &b).unwrap();
        assert_eq!(child.parent_id(), Some(b.id()));
        assert_eq!(system.all_children(&a).len(), 0);
        assert_eq!(system.all_children(&b).len(), 1);
        assert_eq!(child.state_vector().frame(), Some(b.id()));
        // Depths stay consistent for the whole subtree
        let v = FrameVector::new(DerivativeLevel::Position, grandchild.id(), 1.0, 0.0, 0.0);
        assert!(system.convert_vector(&v, root.id()).is_ok());
    }
}
