pub mod accumulate_shader;
pub mod bvh;
pub mod compute;
pub mod copy_shader;
pub mod count_shader;
pub mod gather_shader;
pub mod grid;
pub mod photon;
pub mod photon_map;
pub mod photon_rendering;
pub mod photon_trace_shader;
pub mod raygen_shader;
pub mod raytracing;
pub mod scan_shader;
pub mod scatter_shader;
pub mod scene;
pub mod splat_shader;
pub mod vertex;
