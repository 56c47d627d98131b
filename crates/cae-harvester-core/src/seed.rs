//! Built-in starting vocabulary, inserted by `caeh init`.
//!
//! Seeding is insert-if-absent: entries already in the store (including
//! paused ones) are left as they are.

use crate::models::NewKeyword;

/// `(category, term, weight)`
pub const SEED_KEYWORDS: &[(&str, &str, f64)] = &[
    // fluids
    ("domain", "cfd", 1.0),
    ("domain", "fluid", 1.0),
    ("domain", "navier-stokes", 1.0),
    ("domain", "turbulence", 0.8),
    ("domain", "multiphase", 0.7),
    ("domain", "combustion", 0.6),
    // solids
    ("domain", "structural", 1.0),
    ("domain", "solid-mechanics", 1.0),
    ("domain", "elasticity", 0.7),
    ("domain", "plasticity", 0.7),
    ("domain", "fracture", 0.7),
    ("domain", "contact", 0.6),
    // thermal
    ("domain", "thermal", 0.8),
    ("domain", "heat-transfer", 0.8),
    ("domain", "radiation", 0.6),
    // electromagnetics and optics
    ("domain", "electromagnetics", 1.0),
    ("domain", "maxwell", 0.9),
    ("domain", "fdtd", 0.7),
    ("domain", "photonics", 0.7),
    ("domain", "optics", 0.8),
    ("domain", "ray-tracing", 1.0),
    ("domain", "raytracing", 0.8),
    ("domain", "optical-design", 0.7),
    ("domain", "illumination", 0.6),
    ("domain", "path-tracing", 0.6),
    ("domain", "photon-mapping", 0.5),
    ("domain", "brdf", 0.5),
    ("domain", "bsdf", 0.5),
    ("domain", "fresnel", 0.5),
    // semiconductor, materials
    ("domain", "semiconductor", 1.0),
    ("domain", "tcad", 0.9),
    ("domain", "device-simulation", 0.7),
    ("domain", "drift-diffusion", 0.7),
    ("domain", "quantum-transport", 0.6),
    ("domain", "molecular-dynamics", 0.9),
    ("domain", "dft", 0.8),
    ("domain", "electronic-structure", 0.7),
    ("domain", "kinetic-monte-carlo", 0.6),
    ("domain", "phase-field", 0.7),
    // discretization methods
    ("method", "fem", 1.0),
    ("method", "finite-element", 1.0),
    ("method", "fea", 0.8),
    ("method", "dg", 0.6),
    ("method", "discontinuous-galerkin", 0.6),
    ("method", "finite-volume", 0.8),
    ("method", "fvm", 0.7),
    ("method", "finite-difference", 0.7),
    ("method", "fdm", 0.6),
    ("method", "bem", 0.5),
    ("method", "boundary-element", 0.5),
    ("method", "lbm", 0.5),
    ("method", "lattice-boltzmann", 0.5),
    ("method", "sph", 0.5),
    ("method", "mpm", 0.4),
    ("method", "path-tracing", 0.6),
    ("method", "ray-tracing", 0.8),
    ("method", "photon-mapping", 0.5),
    ("method", "monte-carlo", 0.6),
    // what the repo is
    ("intent", "solver", 1.0),
    ("intent", "simulation", 1.0),
    ("intent", "simulator", 0.8),
    ("intent", "engine", 0.8),
    ("intent", "multiphysics", 0.7),
    ("intent", "benchmark", 0.4),
    ("intent", "examples", 0.4),
    ("intent", "tutorial", 0.4),
    // parallel / hpc stack
    ("hpc", "mpi", 0.7),
    ("hpc", "openmp", 0.5),
    ("hpc", "cuda", 0.5),
    ("hpc", "gpu", 0.6),
    ("hpc", "petsc", 0.6),
    ("hpc", "trilinos", 0.5),
    ("hpc", "hypre", 0.4),
];

pub const SEED_SOURCE: &str = "seed";

pub fn seed_keywords() -> Vec<NewKeyword> {
    SEED_KEYWORDS
        .iter()
        .map(|(category, term, weight)| NewKeyword::new(category, term, *weight, SEED_SOURCE))
        .collect()
}
