//! Typed, hierarchical key-value data attached to frames.
//!
//! A variable holds one of the supported payloads and owns two ordered
//! sublists: nested variables (child entries of a `Nested` payload) and
//! attributes (qualifiers of the entry itself). String payloads take the
//! variable's own value lock; vector and quaternion payloads are guarded
//! the same way and additionally by the owning object's state lock when
//! they mirror state components.

use crate::error::{Error, Result};
use frame_algebra::{FrameQuaternion, FrameVector};
use std::any::Any;
use std::sync::{Arc, Mutex, RwLock};

pub type VariableRef = Arc<Variable>;

/// Payload type selector, used when creating variables by (name, type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableType {
    Float,
    String,
    Vector,
    Quaternion,
    Nested,
    Data,
    Callback,
    Function,
}

/// Variable payload.
pub enum Value {
    Float(f64),
    String(String),
    Vector(FrameVector),
    Quaternion(FrameQuaternion),
    /// Structure lives in the nested/attribute lists, not the value.
    Nested,
    /// Opaque data pointer; users downcast to their own type.
    Data(Arc<dyn Any + Send + Sync>),
    /// Opaque function pointer; users downcast to their own signature.
    Callback(Arc<dyn Any + Send + Sync>),
    Function(Function1D),
}

impl Value {
    fn variable_type(&self) -> VariableType {
        match self {
            Value::Float(_) => VariableType::Float,
            Value::String(_) => VariableType::String,
            Value::Vector(_) => VariableType::Vector,
            Value::Quaternion(_) => VariableType::Quaternion,
            Value::Nested => VariableType::Nested,
            Value::Data(_) => VariableType::Data,
            Value::Callback(_) => VariableType::Callback,
            Value::Function(_) => VariableType::Function,
        }
    }

    fn default_for(variable_type: VariableType) -> Value {
        match variable_type {
            VariableType::Float => Value::Float(0.0),
            VariableType::String => Value::String(String::new()),
            VariableType::Vector => Value::Vector(FrameVector::default()),
            VariableType::Quaternion => Value::Quaternion(FrameQuaternion {
                w: 1.0,
                x: 0.0,
                y: 0.0,
                z: 0.0,
                frame: None,
            }),
            VariableType::Nested => Value::Nested,
            VariableType::Data => Value::Data(Arc::new(())),
            VariableType::Callback => Value::Callback(Arc::new(())),
            VariableType::Function => Value::Function(Function1D::default()),
        }
    }
}

/// A named, typed attribute of an object or of another variable.
pub struct Variable {
    name: String,
    value: RwLock<Value>,
    nested: Mutex<Vec<VariableRef>>,
    attributes: Mutex<Vec<VariableRef>>,
}

fn find_by_name(list: &[VariableRef], name: &str) -> Option<VariableRef> {
    list.iter().find(|v| v.name == name).cloned()
}

fn add_to_list(list: &mut Vec<VariableRef>, name: &str, variable_type: VariableType) -> VariableRef {
    if let Some(existing) = find_by_name(list, name) {
        return existing;
    }
    let variable = Arc::new(Variable::new(name, variable_type));
    list.push(variable.clone());
    variable
}

fn move_in_list(list: &mut Vec<VariableRef>, name: &str, to_head: bool) -> Result<()> {
    let index = list
        .iter()
        .position(|v| v.name == name)
        .ok_or_else(|| Error::NotFound(name.to_string()))?;
    let entry = list.remove(index);
    if to_head {
        list.insert(0, entry);
    } else {
        list.push(entry);
    }
    Ok(())
}

impl Variable {
    pub fn new(name: &str, variable_type: VariableType) -> Self {
        Self {
            name: name.chars().take(256).collect(),
            value: RwLock::new(Value::default_for(variable_type)),
            nested: Mutex::new(Vec::new()),
            attributes: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variable_type(&self) -> VariableType {
        self.value.read().unwrap().variable_type()
    }

    pub fn get_float(&self) -> Result<f64> {
        match &*self.value.read().unwrap() {
            Value::Float(v) => Ok(*v),
            _ => Err(Error::InvalidType("float")),
        }
    }

    pub fn set_float(&self, value: f64) -> Result<()> {
        match &mut *self.value.write().unwrap() {
            Value::Float(v) => {
                *v = value;
                Ok(())
            }
            _ => Err(Error::InvalidType("float")),
        }
    }

    /// Parses a numeric string with an optional unit of measurement into
    /// this float variable. This is the loader's entry point for values
    /// like `"6378.145 ft"` or `"100 C"`.
    pub fn set_float_from_string(&self, text: &str) -> Result<()> {
        let value =
            units::string_to_real(text).map_err(|error| Error::Syntax(error.to_string()))?;
        self.set_float(value)
    }

    pub fn get_string(&self) -> Result<String> {
        match &*self.value.read().unwrap() {
            Value::String(v) => Ok(v.clone()),
            _ => Err(Error::InvalidType("string")),
        }
    }

    pub fn set_string(&self, value: &str) -> Result<()> {
        match &mut *self.value.write().unwrap() {
            Value::String(v) => {
                value.clone_into(v);
                Ok(())
            }
            _ => Err(Error::InvalidType("string")),
        }
    }

    pub fn get_vector(&self) -> Result<FrameVector> {
        match &*self.value.read().unwrap() {
            Value::Vector(v) => Ok(*v),
            _ => Err(Error::InvalidType("vector")),
        }
    }

    pub fn set_vector(&self, value: &FrameVector) -> Result<()> {
        match &mut *self.value.write().unwrap() {
            Value::Vector(v) => {
                *v = *value;
                Ok(())
            }
            _ => Err(Error::InvalidType("vector")),
        }
    }

    pub fn get_quaternion(&self) -> Result<FrameQuaternion> {
        match &*self.value.read().unwrap() {
            Value::Quaternion(q) => Ok(*q),
            _ => Err(Error::InvalidType("quaternion")),
        }
    }

    pub fn set_quaternion(&self, value: &FrameQuaternion) -> Result<()> {
        match &mut *self.value.write().unwrap() {
            Value::Quaternion(q) => {
                *q = *value;
                Ok(())
            }
            _ => Err(Error::InvalidType("quaternion")),
        }
    }

    pub fn set_data(&self, data: Arc<dyn Any + Send + Sync>) -> Result<()> {
        *self.value.write().unwrap() = Value::Data(data);
        Ok(())
    }

    pub fn get_data<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        match &*self.value.read().unwrap() {
            Value::Data(data) => data
                .clone()
                .downcast::<T>()
                .map_err(|_| Error::InvalidType("data payload type")),
            _ => Err(Error::InvalidType("data")),
        }
    }

    pub fn set_callback(&self, callback: Arc<dyn Any + Send + Sync>) -> Result<()> {
        *self.value.write().unwrap() = Value::Callback(callback);
        Ok(())
    }

    pub fn get_callback<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        match &*self.value.read().unwrap() {
            Value::Callback(callback) => callback
                .clone()
                .downcast::<T>()
                .map_err(|_| Error::InvalidType("callback signature")),
            _ => Err(Error::InvalidType("callback")),
        }
    }

    pub fn set_function(&self, function: Function1D) -> Result<()> {
        match &mut *self.value.write().unwrap() {
            Value::Function(f) => {
                *f = function;
                Ok(())
            }
            _ => Err(Error::InvalidType("function")),
        }
    }

    /// Evaluates the variable as a 1-D function of `x`.
    ///
    /// Float variables are accepted as constant zero-size tables.
    pub fn function_1d(&self, x: f64) -> Result<f64> {
        match &*self.value.read().unwrap() {
            Value::Float(v) => Ok(*v),
            Value::Function(f) => Ok(f.interpolate(x)),
            _ => Err(Error::InvalidType("function or float")),
        }
    }

    /// Adds a nested variable, returning the existing one when the name is
    /// already present.
    pub fn add_nested(&self, name: &str, variable_type: VariableType) -> VariableRef {
        add_to_list(&mut self.nested.lock().unwrap(), name, variable_type)
    }

    pub fn get_nested(&self, name: &str) -> Result<VariableRef> {
        find_by_name(&self.nested.lock().unwrap(), name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn nested_list(&self) -> Vec<VariableRef> {
        self.nested.lock().unwrap().clone()
    }

    pub fn remove_nested(&self, name: &str) -> Result<()> {
        let mut nested = self.nested.lock().unwrap();
        let index = nested
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        nested.remove(index);
        Ok(())
    }

    pub fn move_nested_in_list(&self, name: &str, to_head: bool) -> Result<()> {
        move_in_list(&mut self.nested.lock().unwrap(), name, to_head)
    }

    pub fn add_attribute(&self, name: &str, variable_type: VariableType) -> VariableRef {
        add_to_list(&mut self.attributes.lock().unwrap(), name, variable_type)
    }

    pub fn get_attribute(&self, name: &str) -> Result<VariableRef> {
        find_by_name(&self.attributes.lock().unwrap(), name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn attribute_list(&self) -> Vec<VariableRef> {
        self.attributes.lock().unwrap().clone()
    }

    /// Deep copy of this variable, its attributes and nested entries.
    pub fn deep_copy(&self) -> VariableRef {
        let value = match &*self.value.read().unwrap() {
            Value::Float(v) => Value::Float(*v),
            Value::String(v) => Value::String(v.clone()),
            Value::Vector(v) => Value::Vector(*v),
            Value::Quaternion(q) => Value::Quaternion(*q),
            Value::Nested => Value::Nested,
            Value::Data(d) => Value::Data(d.clone()),
            Value::Callback(c) => Value::Callback(c.clone()),
            Value::Function(f) => Value::Function(f.clone()),
        };
        let copy = Variable {
            name: self.name.clone(),
            value: RwLock::new(value),
            nested: Mutex::new(self.nested.lock().unwrap().iter().map(|v| v.deep_copy()).collect()),
            attributes: Mutex::new(
                self.attributes
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|v| v.deep_copy())
                    .collect(),
            ),
        };
        Arc::new(copy)
    }
}

/// Tabulated 1-D function with linear interpolation and boundary clamping.
///
/// Samples are kept ascending in `x`. An optional precomputed uniform grid
/// trades memory for constant-time lookup on hot paths (thrust and Isp
/// curves are evaluated every integration sub-step).
#[derive(Clone, Debug, Default)]
pub struct Function1D {
    samples: Vec<(f64, f64)>,
    uniform: Option<UniformTable>,
}

#[derive(Clone, Debug)]
struct UniformTable {
    x0: f64,
    step: f64,
    values: Vec<f64>,
}

impl Function1D {
    pub fn from_samples(mut samples: Vec<(f64, f64)>) -> Self {
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            samples,
            uniform: None,
        }
    }

    /// Precomputes a uniform lookup grid with `count` cells over the sample
    /// range. No-op for fewer than two samples.
    pub fn with_uniform_lookup(mut self, count: usize) -> Self {
        if self.samples.len() < 2 || count < 2 {
            return self;
        }
        let x0 = self.samples[0].0;
        let x1 = self.samples[self.samples.len() - 1].0;
        let step = (x1 - x0) / (count - 1) as f64;
        let values = (0..count)
            .map(|i| self.interpolate_samples(x0 + step * i as f64))
            .collect();
        self.uniform = Some(UniformTable { x0, step, values });
        self
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn interpolate(&self, x: f64) -> f64 {
        if let Some(uniform) = &self.uniform {
            return uniform.interpolate(x);
        }
        self.interpolate_samples(x)
    }

    fn interpolate_samples(&self, x: f64) -> f64 {
        let samples = &self.samples;
        match samples.len() {
            0 => return 0.0,
            1 => return samples[0].1,
            _ => {}
        }
        if x <= samples[0].0 {
            return samples[0].1;
        }
        let last = samples.len() - 1;
        if x >= samples[last].0 {
            return samples[last].1;
        }
        let i = samples.partition_point(|&(sx, _)| sx <= x) - 1;
        let (x0, f0) = samples[i];
        let (x1, f1) = samples[i + 1];
        f0 + (f1 - f0) * ((x - x0) / (x1 - x0))
    }
}

impl UniformTable {
    fn interpolate(&self, x: f64) -> f64 {
        let last = self.values.len() - 1;
        let offset = (x - self.x0) / self.step;
        if offset <= 0.0 {
            return self.values[0];
        }
        if offset >= last as f64 {
            return self.values[last];
        }
        let i = offset as usize;
        let frac = offset - i as f64;
        self.values[i] + (self.values[i + 1] - self.values[i]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const TOL: f64 = 1e-12;

    #[test]
    fn test_add_is_idempotent() {
        let root = Variable::new("geometry", VariableType::Nested);
        let a = root.add_nested("section", VariableType::Float);
        let b = root.add_nested("section", VariableType::Float);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(root.nested_list().len(), 1);
    }

    #[test]
    fn test_typed_accessors_reject_wrong_type() {
        let v = Variable::new("mass", VariableType::Float);
        v.set_float(100.0).unwrap();
        assert!(v.get_string().is_err());
        assert!(v.get_vector().is_err());
        assert_abs_diff_eq!(v.get_float().unwrap(), 100.0, epsilon = TOL);
    }

    #[test]
    fn test_set_float_from_string_with_units() {
        let v = Variable::new("length", VariableType::Float);
        v.set_float_from_string("100 ft").unwrap();
        assert_abs_diff_eq!(v.get_float().unwrap(), 30.48, epsilon = 1e-9);
        assert!(matches!(
            v.set_float_from_string("oops"),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn test_attributes_are_separate_from_nested() {
        let v = Variable::new("section", VariableType::Nested);
        v.add_attribute("offset", VariableType::Float);
        v.add_nested("point", VariableType::Float);
        assert_eq!(v.attribute_list().len(), 1);
        assert_eq!(v.nested_list().len(), 1);
        assert!(v.get_attribute("point").is_err());
        assert!(v.get_nested("offset").is_err());
    }

    #[test]
    fn test_function_interpolation_with_clamping() {
        let f = Function1D::from_samples(vec![(0.0, 1.0), (1.0, 3.0), (2.0, 2.0)]);
        assert_abs_diff_eq!(f.interpolate(-1.0), 1.0, epsilon = TOL);
        assert_abs_diff_eq!(f.interpolate(0.5), 2.0, epsilon = TOL);
        assert_abs_diff_eq!(f.interpolate(1.5), 2.5, epsilon = TOL);
        assert_abs_diff_eq!(f.interpolate(5.0), 2.0, epsilon = TOL);
    }

    #[test]
    fn test_function_sorts_samples() {
        let f = Function1D::from_samples(vec![(2.0, 2.0), (0.0, 1.0), (1.0, 3.0)]);
        assert_abs_diff_eq!(f.interpolate(0.5), 2.0, epsilon = TOL);
    }

    #[test]
    fn test_uniform_lookup_matches_direct() {
        let samples = vec![(0.0, 0.0), (1.0, 10.0), (3.0, -2.0), (4.0, 4.0)];
        let direct = Function1D::from_samples(samples.clone());
        let fast = Function1D::from_samples(samples).with_uniform_lookup(4001);
        for i in 0..=40 {
            let x = -0.5 + i as f64 * 0.125;
            assert_abs_diff_eq!(fast.interpolate(x), direct.interpolate(x), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_float_as_constant_function() {
        let v = Variable::new("isp", VariableType::Float);
        v.set_float(320.0).unwrap();
        assert_abs_diff_eq!(v.function_1d(0.0).unwrap(), 320.0, epsilon = TOL);
        assert_abs_diff_eq!(v.function_1d(99.0).unwrap(), 320.0, epsilon = TOL);
    }

    #[test]
    fn test_deep_copy_is_detached() {
        let v = Variable::new("geometry", VariableType::Nested);
        let child = v.add_nested("radius", VariableType::Float);
        child.set_float(5.0).unwrap();

        let copy = v.deep_copy();
        copy.get_nested("radius").unwrap().set_float(7.0).unwrap();
        assert_abs_diff_eq!(child.get_float().unwrap(), 5.0, epsilon = TOL);
    }

    #[test]
    fn test_move_in_list() {
        let v = Variable::new("sections", VariableType::Nested);
        v.add_nested("a", VariableType::Float);
        v.add_nested("b", VariableType::Float);
        v.add_nested("c", VariableType::Float);
        v.move_nested_in_list("c", true).unwrap();
        let names: Vec<String> = v.nested_list().iter().map(|x| x.name().to_string()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
