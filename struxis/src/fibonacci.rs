use crate::constant::Direction;
use crate::swing::Swing;

pub const RETRACEMENT_RATIOS: [f64; 7] = [0.0, 0.236, 0.382, 0.5, 0.618, 0.786, 1.0];
pub const EXTENSION_RATIOS: [f64; 3] = [1.272, 1.618, 2.0];

#[derive(Debug, Clone, Copy)]
pub struct FibonacciLevel {
    pub ratio: f64,
    pub price: f64,
}

/// Retracement/extension levels anchored to the current dominant swing.
#[derive(Debug, Clone)]
pub struct FibonacciSet {
    pub swing_id: u64,
    pub retracements: Vec<FibonacciLevel>,
    pub extensions: Vec<FibonacciLevel>,
}

/// Derives a `FibonacciSet` from the dominant swing. Stateless: the facade
/// recomputes it only when dominance or the dominant swing's endpoints
/// change, per the contract.
pub struct FibonacciProjector;

impl FibonacciProjector {
    pub fn project(swing: &Swing) -> FibonacciSet {
        // 0% is always the swing's start price and 100% its end price,
        // whichever direction the swing runs.
        let zero = swing.start.price;
        let hundred = swing.end.price;
        let span = hundred - zero;

        let retracements = RETRACEMENT_RATIOS
            .iter()
            .map(|&ratio| FibonacciLevel {
                ratio,
                price: zero + span * ratio,
            })
            .collect();
        let extensions = EXTENSION_RATIOS
            .iter()
            .map(|&ratio| FibonacciLevel {
                ratio,
                price: zero + span * ratio,
            })
            .collect();

        FibonacciSet {
            swing_id: swing.id,
            retracements,
            extensions,
        }
    }
}
