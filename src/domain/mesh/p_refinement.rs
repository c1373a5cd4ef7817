use super::MAX_POLYNOMIAL_ORDER;
use std::fmt;
use thiserror::Error;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PolyOrders {
    /// Maximum u-directed polynomial expansion order
    pub ni: u8,
    /// Maximum v-directed polynomial expansion order (unused on Intervals)
    pub nj: u8,
}

impl PolyOrders {
    pub const fn from(i: u8, j: u8) -> Self {
        Self { ni: i, nj: j }
    }

    /// Equal expansion orders in both directions
    pub const fn iso(n: u8) -> Self {
        Self { ni: n, nj: n }
    }

    pub fn set(&mut self, [ni, nj]: [u8; 2]) -> Result<(), PRefError> {
        if ni > MAX_POLYNOMIAL_ORDER || nj > MAX_POLYNOMIAL_ORDER {
            return Err(PRefError::ExceededMaxExpansion);
        }
        if ni == 0 || nj == 0 {
            return Err(PRefError::NegExpansion);
        }

        self.ni = ni;
        self.nj = nj;

        Ok(())
    }

    /// Get the permutations of [i, j] for the tensor-product Legendre basis: i ∈ [0, Ni] and j ∈ [0, Nj]
    pub fn permutations(&self) -> impl Iterator<Item = [u8; 2]> + '_ {
        (0..=self.ni).flat_map(move |i_order| (0..=self.nj).map(move |j_order| [i_order, j_order]))
    }

    /// Number of tensor-product basis functions on a quadrilateral
    pub fn quad_size(&self) -> usize {
        (self.ni as usize + 1) * (self.nj as usize + 1)
    }

    /// Number of basis functions on an Interval
    pub fn interval_size(&self) -> usize {
        self.ni as usize + 1
    }

    pub fn max_with(&self, orders: [u8; 2]) -> [u8; 2] {
        [
            std::cmp::max(self.ni, orders[0]),
            std::cmp::max(self.nj, orders[1]),
        ]
    }

    pub fn max_order(&self) -> u8 {
        std::cmp::max(self.ni, self.nj)
    }

    /// Both orders lowered by one, but not below `floor`
    pub fn decremented(&self, floor: u8) -> Self {
        Self {
            ni: self.ni.saturating_sub(1).max(floor),
            nj: self.nj.saturating_sub(1).max(floor),
        }
    }
}

impl Default for PolyOrders {
    fn default() -> Self {
        Self { ni: 1, nj: 1 }
    }
}

impl fmt::Display for PolyOrders {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}]", self.ni, self.nj)
    }
}

#[cfg(feature = "json_export")]
impl From<PolyOrders> for JsonValue {
    fn from(orders: PolyOrders) -> Self {
        object! {
            "u": orders.ni,
            "v": orders.nj,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PRefError {
    #[error("Expansion orders must be at least 1; Cannot set expansion orders!")]
    NegExpansion,
    #[error("Expansion order exceeds the maximum; Cannot set expansion orders!")]
    ExceededMaxExpansion,
    #[error("Elem {0} does not exist; Cannot set expansion orders!")]
    ElemDoesntExist(usize),
    #[error("Multiple expansion orders were specified for Elem {0}")]
    DoubleRefinement(usize),
}
