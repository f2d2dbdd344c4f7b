use std::{borrow::Cow, fmt::Display, str::FromStr};

use crate::{
    errors::ConfigError,
    field::MeshField,
    material::MaterialMasks,
    mesh::NodeKey,
};

/// Handle of a variable registered on a swarm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

impl VarId {
    /// Particle positions, `dim` floats per particle.
    pub const COORDINATES: VarId = VarId(0);
    /// Owning cell of every particle, `-1` until located.
    pub const CELL_ID: VarId = VarId(1);
    /// Position at the start of the current advection step.
    pub const LAUNCH_POINT: VarId = VarId(2);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Float,
    Int,
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Float => write!(f, "float"),
            DataType::Int => write!(f, "int"),
        }
    }
}

impl FromStr for DataType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "float" | "f64" | "double" => Ok(DataType::Float),
            "int" | "i32" | "i64" => Ok(DataType::Int),
            _ => Err(ConfigError::UnsupportedDataType(s.to_string())),
        }
    }
}

/// Row-major particle values of a variable.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl ChannelData {
    pub fn new(data_type: DataType) -> Self {
        match data_type {
            DataType::Float => ChannelData::Float(vec![]),
            DataType::Int => ChannelData::Int(vec![]),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ChannelData::Float(_) => DataType::Float,
            ChannelData::Int(_) => DataType::Int,
        }
    }

    /// Total number of stored values (rows times components).
    pub fn len(&self) -> usize {
        match self {
            ChannelData::Float(v) => v.len(),
            ChannelData::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values converted to floats, as consumed by projections.
    pub fn as_f64(&self) -> Cow<'_, [f64]> {
        match self {
            ChannelData::Float(v) => Cow::Borrowed(v.as_slice()),
            ChannelData::Int(v) => Cow::Owned(v.iter().map(|i| *i as f64).collect()),
        }
    }

    /// Resize to `len` values, new values are zero.
    pub(crate) fn resize(&mut self, len: usize) {
        match self {
            ChannelData::Float(v) => v.resize(len, 0.),
            ChannelData::Int(v) => v.resize(len, 0),
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            ChannelData::Float(v) => v.clear(),
            ChannelData::Int(v) => v.clear(),
        }
    }

    /// Keep the rows for which `keep` is set.
    pub(crate) fn retain_rows(&mut self, keep: &[bool], num_components: usize) {
        fn retain<T: Copy>(values: &mut Vec<T>, keep: &[bool], n: usize) {
            let mut row = 0;
            let mut kept = 0;
            while row < keep.len() {
                if keep[row] {
                    values.copy_within(row * n..(row + 1) * n, kept * n);
                    kept += 1;
                }
                row += 1;
            }
            values.truncate(kept * n);
        }
        match self {
            ChannelData::Float(v) => retain(v, keep, num_components),
            ChannelData::Int(v) => retain(v, keep, num_components),
        }
    }
}

/// Options of the mesh proxy of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProxyOptions {
    pub degree: u8,
    pub continuous: bool,
    /// Fill every node from its nearest particle instead of the distance weighted average.
    pub nearest_neighbour_only: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            degree: 1,
            continuous: true,
            nearest_neighbour_only: false,
        }
    }
}

impl ProxyOptions {
    pub fn key(&self) -> Result<NodeKey, ConfigError> {
        NodeKey::new(self.degree, self.continuous)
    }
}

#[derive(Clone, Debug)]
pub enum Proxy {
    None,
    Nodal {
        options: ProxyOptions,
        field: MeshField,
    },
    Masks(MaterialMasks),
}

impl Proxy {
    pub fn key(&self) -> Option<NodeKey> {
        match self {
            Proxy::None => None,
            Proxy::Nodal { field, .. } => Some(field.key()),
            Proxy::Masks(masks) => Some(masks.key()),
        }
    }
}

/// A named, typed, fixed arity array co-indexed with the particles of a swarm.
#[derive(Clone, Debug)]
pub struct Channel {
    pub(crate) name: String,
    pub(crate) num_components: usize,
    pub(crate) data: ChannelData,
    /// Incremented every time write access is granted
    pub(crate) state: u64,
    pub(crate) proxy: Proxy,
}

impl Channel {
    pub(crate) fn new(name: &str, num_components: usize, data_type: DataType, proxy: Proxy) -> Self {
        Self {
            name: name.to_string(),
            num_components,
            data: ChannelData::new(data_type),
            state: 0,
            proxy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_components(&self) -> usize {
        self.num_components
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_data_type() {
        assert_eq!("F64".parse::<DataType>().unwrap(), DataType::Float);
        assert_eq!("i32".parse::<DataType>().unwrap(), DataType::Int);
        assert!(matches!(
            "complex".parse::<DataType>(),
            Err(ConfigError::UnsupportedDataType(_))
        ));
    }

    #[test]
    fn test_retain_rows() {
        let mut data = ChannelData::Float(vec![0., 0.5, 1., 1.5, 2., 2.5]);
        data.retain_rows(&[true, false, true], 2);
        assert_eq!(data, ChannelData::Float(vec![0., 0.5, 2., 2.5]));

        let mut data = ChannelData::Int(vec![4, 5, 6]);
        data.retain_rows(&[false, false, true], 1);
        assert_eq!(data, ChannelData::Int(vec![6]));
        data.resize(3);
        assert_eq!(&*data.as_f64(), &[6., 0., 0.]);
    }
}
