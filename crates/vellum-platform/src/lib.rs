// SPDX-License-Identifier: CEPL-1.0
//! Single place that pins the windowing stack. Downstream crates say
//! `vellum_platform::winit::...` so a winit bump touches one manifest.
pub use winit;
