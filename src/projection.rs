//! Spherical Mercator with an ellipsoidal eccentricity correction.
//!
//! Output is in tenths of a meter so that a city-sized extract fits in a
//! drawing of a few thousand units.

use std::f64::consts::FRAC_PI_2;

use crate::data::osm::{Bounds, Coordinate};

pub const R_MAJOR: f64 = 6378137.0;
pub const R_MINOR: f64 = 6356752.3142;
const RATIO: f64 = R_MINOR / R_MAJOR;
const UNIT_SCALE: f64 = 0.1;
pub const MAX_LAT: f64 = 89.5;

fn eccentricity() -> f64 {
    (1.0 - RATIO * RATIO).sqrt()
}

pub fn lon_to_x(lon: f64) -> f64 {
    R_MAJOR * lon.to_radians() * UNIT_SCALE
}

pub fn lat_to_y(lat: f64) -> f64 {
    let eccent = eccentricity();
    let com = 0.5 * eccent;

    let phi = lat.clamp(-MAX_LAT, MAX_LAT).to_radians();
    let con = eccent * phi.sin();
    let con = ((1.0 - con) / (1.0 + con)).powf(com);
    let ts = (0.5 * (FRAC_PI_2 - phi)).tan() / con;
    -R_MAJOR * ts.ln() * UNIT_SCALE
}

/// Maps coordinates to drawing units with the top-left of the bounds at the
/// origin and y growing downwards.
#[derive(Debug, Clone, Copy)]
pub struct Projector {
    origin_x: f64,
    origin_y: f64,
}

impl Projector {
    pub fn new(bounds: &Bounds) -> Projector {
        Projector {
            origin_x: lon_to_x(bounds.minlon),
            origin_y: lat_to_y(bounds.maxlat),
        }
    }

    pub fn to_display(&self, coords: &Coordinate) -> (f64, f64) {
        let x = lon_to_x(coords.lon) - self.origin_x;
        let y = -lat_to_y(coords.lat) + self.origin_y;
        (x, y)
    }
}
