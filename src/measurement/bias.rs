//! Bias points, the bias grid, and recorded operating points.

use serde::{Deserialize, Serialize};

/// Commanded voltages for supply 1 and supply 2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasPoint {
    /// Supply 1 voltage (V)
    pub v1: f64,
    /// Supply 2 voltage (V)
    pub v2: f64,
}

impl BiasPoint {
    /// Bias pair from the two commanded voltages.
    pub fn new(v1: f64, v2: f64) -> Self {
        Self { v1, v2 }
    }

    /// Filename fragment for this point, e.g. `12_04` for `(1.2, 0.4)`.
    pub fn tag(&self) -> String {
        format!("{}_{}", voltage_tag(self.v1), voltage_tag(self.v2))
    }
}

impl std::fmt::Display for BiasPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} V, {} V)", decimal(self.v1), decimal(self.v2))
    }
}

/// Render a voltage as a decimal literal with at least one fractional digit.
fn decimal(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

/// Filename-safe rendering of a voltage: the decimal literal with its point removed.
///
/// `1.2` becomes `12`, `0.0` becomes `00`, `-0.4` becomes `-04`.
pub fn voltage_tag(v: f64) -> String {
    decimal(v).replace('.', "")
}

/// Cartesian product of the two voltage sequences.
///
/// Iterates with `v1` as the outer loop and `v2` varying fastest. File naming
/// and the row order of the operating-point table both follow this order.
#[derive(Debug, Clone, PartialEq)]
pub struct BiasGrid {
    bias1: Vec<f64>,
    bias2: Vec<f64>,
}

impl BiasGrid {
    /// Grid over `bias1` (outer) and `bias2` (inner).
    pub fn new(bias1: Vec<f64>, bias2: Vec<f64>) -> Self {
        Self { bias1, bias2 }
    }

    /// Number of bias points visited.
    pub fn len(&self) -> usize {
        self.bias1.len() * self.bias2.len()
    }

    /// True when the grid has no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bias points in visiting order, `v2` varying fastest.
    pub fn iter(&self) -> impl Iterator<Item = BiasPoint> + '_ {
        self.bias1
            .iter()
            .flat_map(move |&v1| self.bias2.iter().map(move |&v2| BiasPoint::new(v1, v2)))
    }
}

/// Commanded voltages plus what each supply reports after settling.
///
/// Field names double as the CSV header of the operating-point table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    /// Supply 1 voltage (V)
    pub v1: f64,
    /// Supply 2 voltage (V)
    pub v2: f64,
    /// Measured supply 1 voltage (V)
    pub meas_v1: f64,
    /// Measured supply 1 current (A)
    pub meas_i1: f64,
    /// Measured supply 2 voltage (V)
    pub meas_v2: f64,
    /// Measured supply 2 current (A)
    pub meas_i2: f64,
}

impl OperatingPoint {
    /// Combine a bias point with the (voltage, current) readback of each supply.
    pub fn new(bias: BiasPoint, supply1: (f64, f64), supply2: (f64, f64)) -> Self {
        Self {
            v1: bias.v1,
            v2: bias.v2,
            meas_v1: supply1.0,
            meas_i1: supply1.1,
            meas_v2: supply2.0,
            meas_i2: supply2.1,
        }
    }

    /// Commanded bias of this row.
    pub fn bias(&self) -> BiasPoint {
        BiasPoint::new(self.v1, self.v2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voltage_tag() {
        assert_eq!(voltage_tag(0.0), "00");
        assert_eq!(voltage_tag(1.2), "12");
        assert_eq!(voltage_tag(0.2), "02");
        assert_eq!(voltage_tag(1.0), "10");
        assert_eq!(voltage_tag(1.8), "18");
        assert_eq!(voltage_tag(-0.4), "-04");
        assert_eq!(voltage_tag(0.25), "025");
    }

    #[test]
    fn test_bias_tag() {
        assert_eq!(BiasPoint::new(1.2, 0.0).tag(), "12_00");
    }

    #[test]
    fn test_grid_order_second_sequence_fastest() {
        let grid = BiasGrid::new(vec![0.0, 0.2], vec![0.0, 0.2]);
        let points: Vec<_> = grid.iter().collect();
        assert_eq!(
            points,
            vec![
                BiasPoint::new(0.0, 0.0),
                BiasPoint::new(0.0, 0.2),
                BiasPoint::new(0.2, 0.0),
                BiasPoint::new(0.2, 0.2),
            ]
        );
    }

    #[test]
    fn test_grid_is_cartesian_product() {
        let bias1 = vec![0.0, 0.5, 1.0];
        let bias2 = vec![-0.1, 0.1, 0.3, 0.5];
        let grid = BiasGrid::new(bias1.clone(), bias2.clone());
        assert_eq!(grid.len(), 12);

        for (i, point) in grid.iter().enumerate() {
            assert_eq!(point.v1, bias1[i / bias2.len()]);
            assert_eq!(point.v2, bias2[i % bias2.len()]);
        }
    }

    #[test]
    fn test_empty_grid() {
        let grid = BiasGrid::new(vec![0.0], vec![]);
        assert!(grid.is_empty());
        assert_eq!(grid.iter().count(), 0);
    }

    #[test]
    fn test_operating_point_from_readback() {
        let op = OperatingPoint::new(BiasPoint::new(1.0, 0.4), (0.998, 0.012), (0.401, 0.0));
        assert_eq!(op.bias(), BiasPoint::new(1.0, 0.4));
        assert_eq!(op.meas_i1, 0.012);
        assert_eq!(op.meas_v2, 0.401);
    }

    #[test]
    fn test_display() {
        assert_eq!(BiasPoint::new(0.0, 1.2).to_string(), "(0.0 V, 1.2 V)");
    }
}
