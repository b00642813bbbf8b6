//! Buffer: an N-dimensional float payload with explicit host/device
//! location tracking.
//!
//! Real OpenCL bindings are out of scope; `DeviceHandle` stands in for a
//! `cl_mem` allocation so the location state machine can be exercised
//! without a device driver present.

use crate::error::{Result, RuntimeError, UfoError};
use std::sync::Arc;

/// Shape descriptor for a buffer. `n_dims() == 0` conventionally means
/// "no output this tick" when returned from `Task::get_requisition`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Requisition {
    pub dims: Vec<u32>,
}

impl Requisition {
    pub fn new(dims: impl Into<Vec<u32>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn none() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn n_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn n_elements(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Real,
    ComplexInterleaved,
}

impl Layout {
    fn element_multiplier(self) -> usize {
        match self {
            Layout::Real => 1,
            Layout::ComplexInterleaved => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Invalid,
    HostOnly,
    DeviceOnly,
    HostAndDevice,
}

/// Opaque stand-in for a device-resident allocation (a real engine would
/// wrap a `cl_mem` here). Reference-counted so a `Buffer` can be cheaply
/// cloned when a group needs to hand the same device payload to more
/// than one consumer during broadcast.
#[derive(Debug, Clone)]
pub struct DeviceHandle(Arc<Vec<f32>>);

impl DeviceHandle {
    fn from_host(data: &[f32]) -> Self {
        DeviceHandle(Arc::new(data.to_vec()))
    }

    fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// A shaped buffer of 32-bit floats, mirroring `ufo_buffer`'s contract:
/// at most one location is authoritative after a write, and reads from
/// the other side must transfer first.
#[derive(Debug, Clone)]
pub struct Buffer {
    requisition: Requisition,
    layout: Layout,
    location: Location,
    host: Vec<f32>,
    device: Option<DeviceHandle>,
}

impl Buffer {
    pub fn new(requisition: Requisition, layout: Layout) -> Self {
        let len = requisition.n_elements() * layout.element_multiplier();
        Self {
            requisition,
            layout,
            location: Location::Invalid,
            host: vec![0.0; len],
            device: None,
        }
    }

    pub fn requisition(&self) -> &Requisition {
        &self.requisition
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn size_bytes(&self) -> usize {
        self.host.len() * std::mem::size_of::<f32>()
    }

    /// Reallocate for a new shape if the element count changes; layout is
    /// preserved. Both locations are invalidated since old contents no
    /// longer make sense against the new shape.
    pub fn resize(&mut self, requisition: Requisition) {
        if requisition == self.requisition {
            return;
        }
        let len = requisition.n_elements() * self.layout.element_multiplier();
        self.requisition = requisition;
        self.host.clear();
        self.host.resize(len, 0.0);
        self.device = None;
        self.location = Location::Invalid;
    }

    pub fn set_host_array(&mut self, data: Vec<f32>) -> Result<()> {
        let expected = self.requisition.n_elements() * self.layout.element_multiplier();
        if data.len() != expected {
            return Err(UfoError::Runtime(RuntimeError::ShapeMismatch {
                expected: vec![expected as u32],
                actual: vec![data.len() as u32],
            }));
        }
        self.host = data;
        self.device = None;
        self.location = Location::HostOnly;
        Ok(())
    }

    /// Returns the host array, transferring from device first if the
    /// host side is not yet authoritative. `transfer` models an
    /// OpenCL command queue; its absence with a device-only buffer is a
    /// `Location` error, matching the original's synchronous-copy
    /// requirement.
    pub fn get_host_array(&mut self, transfer: bool) -> Result<&mut [f32]> {
        match self.location {
            Location::DeviceOnly => {
                if !transfer {
                    return Err(UfoError::Runtime(RuntimeError::Location(
                        "host array requested on device-only buffer without a transfer queue"
                            .into(),
                    )));
                }
                let device = self.device.as_ref().expect("device-only implies device set");
                self.host.copy_from_slice(device.as_slice());
                self.location = Location::HostAndDevice;
            }
            Location::Invalid => {
                self.location = Location::HostOnly;
            }
            Location::HostOnly | Location::HostAndDevice => {}
        }
        Ok(&mut self.host)
    }

    pub fn get_device_array(&mut self, transfer: bool) -> Result<DeviceHandle> {
        match self.location {
            Location::HostOnly => {
                if !transfer {
                    return Err(UfoError::Runtime(RuntimeError::Location(
                        "device array requested on host-only buffer without a transfer queue"
                            .into(),
                    )));
                }
                self.device = Some(DeviceHandle::from_host(&self.host));
                self.location = Location::HostAndDevice;
            }
            Location::Invalid => {
                self.device = Some(DeviceHandle::from_host(&self.host));
                self.location = Location::DeviceOnly;
            }
            Location::DeviceOnly | Location::HostAndDevice => {}
        }
        Ok(self.device.clone().expect("device side populated above"))
    }

    /// Mark one side as no longer authoritative, for consumers that are
    /// about to overwrite it in place rather than read stale contents.
    pub fn discard_location(&mut self, keep: Location) {
        self.location = keep;
        if keep == Location::HostOnly {
            self.device = None;
        }
    }

    /// Copy full contents from `src`, preserving `src`'s authoritative
    /// location.
    pub fn copy_from(&mut self, src: &Buffer) {
        self.requisition = src.requisition.clone();
        self.layout = src.layout;
        self.host = src.host.clone();
        self.device = src.device.clone();
        self.location = src.location;
    }

    /// Expand packed integer samples (previously loaded via
    /// `set_host_array` as bit patterns) into normalized floats in
    /// place. Must process back-to-front: the backing storage is sized
    /// for `f32` already, so converting front-to-back would overwrite
    /// not-yet-read source bytes.
    pub fn reinterpret(&mut self, source_depth: SourceDepth) -> Result<()> {
        if self.location != Location::HostOnly && self.location != Location::HostAndDevice {
            return Err(UfoError::Runtime(RuntimeError::Location(
                "reinterpret requires a host-resident buffer".into(),
            )));
        }
        let max = source_depth.max_value() as f32;
        for i in (0..self.host.len()).rev() {
            let raw = self.host[i].to_bits() as u32 & source_depth.mask();
            self.host[i] = raw as f32 / max;
        }
        self.device = None;
        self.location = Location::HostOnly;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDepth {
    U8,
    U16,
}

impl SourceDepth {
    fn mask(self) -> u32 {
        match self {
            SourceDepth::U8 => 0xFF,
            SourceDepth::U16 => 0xFFFF,
        }
    }

    fn max_value(self) -> u32 {
        self.mask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_noop_on_same_shape() {
        let mut buf = Buffer::new(Requisition::new(vec![4, 4]), Layout::Real);
        buf.set_host_array(vec![1.0; 16]).unwrap();
        buf.resize(Requisition::new(vec![4, 4]));
        assert_eq!(buf.get_host_array(false).unwrap(), &[1.0; 16][..]);
    }

    #[test]
    fn resize_different_shape_invalidates() {
        let mut buf = Buffer::new(Requisition::new(vec![4, 4]), Layout::Real);
        buf.set_host_array(vec![1.0; 16]).unwrap();
        buf.resize(Requisition::new(vec![2, 2]));
        assert_eq!(buf.location(), Location::Invalid);
        assert_eq!(buf.get_host_array(false).unwrap().len(), 4);
    }

    #[test]
    fn host_device_round_trip_preserves_contents() {
        let mut buf = Buffer::new(Requisition::new(vec![8]), Layout::Real);
        buf.set_host_array((0..8).map(|i| i as f32).collect()).unwrap();
        let _ = buf.get_device_array(true).unwrap();
        buf.discard_location(Location::DeviceOnly);
        let host_again = buf.get_host_array(true).unwrap().to_vec();
        assert_eq!(host_again, (0..8).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn device_only_host_read_without_transfer_errors() {
        let mut buf = Buffer::new(Requisition::new(vec![4]), Layout::Real);
        buf.set_host_array(vec![0.0; 4]).unwrap();
        let _ = buf.get_device_array(true).unwrap();
        buf.discard_location(Location::DeviceOnly);
        assert!(buf.get_host_array(false).is_err());
    }

    #[test]
    fn copy_preserves_authoritative_location() {
        let mut a = Buffer::new(Requisition::new(vec![4]), Layout::Real);
        a.set_host_array(vec![2.0; 4]).unwrap();
        let mut b = Buffer::new(Requisition::new(vec![4]), Layout::Real);
        b.copy_from(&a);
        let mut c = Buffer::new(Requisition::new(vec![4]), Layout::Real);
        c.copy_from(&b);
        assert_eq!(c.get_host_array(false).unwrap(), &[2.0; 4][..]);
    }

    #[test]
    fn reinterpret_u8_normalizes_exactly() {
        let mut buf = Buffer::new(Requisition::new(vec![1]), Layout::Real);
        buf.set_host_array(vec![f32::from_bits(255)]).unwrap();
        buf.reinterpret(SourceDepth::U8).unwrap();
        assert_eq!(buf.get_host_array(false).unwrap()[0], 1.0);
    }

    #[test]
    fn reinterpret_u16_normalizes_exactly() {
        let mut buf = Buffer::new(Requisition::new(vec![1]), Layout::Real);
        buf.set_host_array(vec![f32::from_bits(32768)]).unwrap();
        buf.reinterpret(SourceDepth::U16).unwrap();
        assert!((buf.get_host_array(false).unwrap()[0] - 32768.0 / 65535.0).abs() < 1e-6);
    }
}
