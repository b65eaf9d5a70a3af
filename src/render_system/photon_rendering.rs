use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use image::RgbaImage;

use crate::{
    camera::CameraSnapshot,
    config::{GatherStrategy, PhotonMapConfig},
    error::{Error, Result},
    render_system::{
        accumulate_shader,
        compute::{AtomicBuffer, AtomicF32Buffer, ComputeEngine, ThreadPoolEngine},
        copy_shader, gather_shader,
        grid::UniformGrid,
        photon_map::{PhotonMap, PhotonMapBuilder},
        photon_trace_shader,
        raygen_shader::{self, GBuffer},
        raytracing::{BvhRayTracer, RayTracingEngine},
        scene::SceneProvider,
        splat_shader,
    },
};

pub const FRAME_COUNT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    // no scene loaded
    Uninitialized,
    // the next frame must rebuild the photon map
    PhotonMapStale,
    Building,
    PhotonMapReady,
    Rendering,
}

// cloneable and usable from any thread, picked up at the start of the next frame
#[derive(Clone, Debug, Default)]
pub struct InvalidationHandle(Arc<AtomicU64>);

impl InvalidationHandle {
    pub fn invalidate(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub fn generation(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

pub struct PipelineContext<'a> {
    pub config: &'a PhotonMapConfig,
    pub engine: &'a dyn ComputeEngine,
    pub scene: &'a dyn SceneProvider,
    pub tracer: Arc<dyn RayTracingEngine>,
    pub camera: CameraSnapshot,
    // invalidation generation current when the frame started
    pub generation: u64,
}

struct FrameResources {
    gbuffer: GBuffer,
    // rgb radiance per render target pixel
    radiance: AtomicF32Buffer,
    // rgb flux per render target pixel, photon-major only
    flux: AtomicF32Buffer,
    // packed rgba8 per output pixel
    output: AtomicBuffer,
}

impl FrameResources {
    fn new(config: &PhotonMapConfig) -> FrameResources {
        let [rt_width, rt_height] = config.render_extent();
        let rt_pixels = (rt_width * rt_height) as usize;
        let flux_len = match config.strategy {
            GatherStrategy::PixelMajor => 0,
            GatherStrategy::PhotonMajor => 3 * rt_pixels,
        };
        FrameResources {
            gbuffer: GBuffer::new(rt_pixels),
            radiance: AtomicF32Buffer::new(3 * rt_pixels),
            flux: AtomicF32Buffer::new(flux_len),
            output: AtomicBuffer::new((config.width * config.height) as usize),
        }
    }

    fn clear(&mut self, engine: &dyn ComputeEngine) -> Result<()> {
        self.gbuffer.reset();
        copy_shader::clear_f32(engine, "clear_radiance", &self.radiance);
        copy_shader::clear_f32(engine, "clear_flux", &self.flux);
        engine.barrier()
    }
}

fn transition(state: &mut PipelineState, next: PipelineState) {
    if *state != next {
        tracing::debug!(from = ?*state, to = ?next, "pipeline state");
        *state = next;
    }
}

fn build_photon_map(ctx: &PipelineContext, builder: &PhotonMapBuilder) -> Result<PhotonMap> {
    let photons = photon_trace_shader::generate_photons(ctx, *builder.grid())?;
    builder.build(ctx.engine, photons, ctx.generation)
}

fn render_frame(
    ctx: &PipelineContext,
    frame: &mut FrameResources,
    map: Arc<PhotonMap>,
) -> Result<RgbaImage> {
    frame.clear(ctx.engine)?;
    raygen_shader::raygen(ctx, &frame.gbuffer)?;
    match ctx.config.strategy {
        GatherStrategy::PixelMajor => {
            gather_shader::gather(ctx, map, &frame.gbuffer, &frame.radiance)?;
        }
        GatherStrategy::PhotonMajor => {
            splat_shader::splat(ctx, map, &frame.gbuffer, &frame.flux)?;
            splat_shader::resolve(ctx, &frame.gbuffer, &frame.flux, &frame.radiance)?;
        }
    }
    accumulate_shader::composite(ctx, &frame.radiance, &frame.output)
}

/// Drives the photon mapping pipeline frame by frame.
///
/// The photon map is rebuilt only when it is stale: after a scene load, a
/// camera change or an explicit invalidation. Otherwise frames reuse the
/// last map and only run the camera, gather and composite passes.
pub struct Renderer {
    config: PhotonMapConfig,
    engine: Box<dyn ComputeEngine>,
    scene: Option<Arc<dyn SceneProvider>>,
    tracer: Option<Arc<dyn RayTracingEngine>>,
    builder: PhotonMapBuilder,
    // double buffered: gather reads the front map while the back slot receives a build
    photon_maps: [Option<Arc<PhotonMap>>; 2],
    front: usize,
    frames: Vec<FrameResources>,
    frame_count: u64,
    state: PipelineState,
    invalidation: InvalidationHandle,
    last_camera: Option<CameraSnapshot>,
    builds: u64,
}

impl Renderer {
    pub fn new(config: PhotonMapConfig, engine: Box<dyn ComputeEngine>) -> Result<Renderer> {
        config.validate()?;
        let builder = PhotonMapBuilder::new(UniformGrid::from_config(&config));
        let frames = (0..FRAME_COUNT).map(|_| FrameResources::new(&config)).collect();
        Ok(Renderer {
            config,
            engine,
            scene: None,
            tracer: None,
            builder,
            photon_maps: [None, None],
            front: 0,
            frames,
            frame_count: 0,
            state: PipelineState::Uninitialized,
            invalidation: InvalidationHandle::default(),
            last_camera: None,
            builds: 0,
        })
    }

    pub fn with_thread_pool(config: PhotonMapConfig) -> Result<Renderer> {
        let engine = ThreadPoolEngine::new(config.worker_threads, config.workgroup_size);
        Renderer::new(config, Box::new(engine))
    }

    pub fn config(&self) -> &PhotonMapConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn builds(&self) -> u64 {
        self.builds
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn photon_map(&self) -> Option<Arc<PhotonMap>> {
        self.photon_maps[self.front].clone()
    }

    pub fn invalidation_handle(&self) -> InvalidationHandle {
        self.invalidation.clone()
    }

    pub fn set_scene(&mut self, scene: Arc<dyn SceneProvider>) {
        let tracer = BvhRayTracer::new(scene.triangles().to_vec());
        tracing::debug!(nodes = tracer.node_count(), "scene bvh built");
        self.set_scene_with_tracer(scene, Arc::new(tracer));
    }

    pub fn set_scene_with_tracer(
        &mut self,
        scene: Arc<dyn SceneProvider>,
        tracer: Arc<dyn RayTracingEngine>,
    ) {
        tracing::info!(
            triangles = scene.triangles().len(),
            lights = scene.lights().len(),
            "scene set"
        );
        let bounds = scene.bounds();
        let grid = self.builder.grid();
        let (grid_min, grid_max) = (grid.min, grid.max());
        if (0..3).any(|i| bounds.min()[i] < grid_min[i] || bounds.max()[i] > grid_max[i]) {
            // photons landing outside the grid are dropped
            tracing::warn!(
                scene_min = ?bounds.min(),
                scene_max = ?bounds.max(),
                grid_min = ?grid_min,
                grid_max = ?grid_max,
                "scene extends past the photon grid"
            );
        }
        self.scene = Some(scene);
        self.tracer = Some(tracer);
        self.last_camera = None;
        transition(&mut self.state, PipelineState::PhotonMapStale);
    }

    pub fn render(&mut self) -> Result<RgbaImage> {
        let camera = self.scene.as_ref().ok_or(Error::NoScene)?.camera();
        self.render_with_camera(camera)
    }

    #[tracing::instrument(skip_all, fields(frame = self.frame_count))]
    pub fn render_with_camera(&mut self, camera: CameraSnapshot) -> Result<RgbaImage> {
        let (Some(scene), Some(tracer)) = (self.scene.clone(), self.tracer.clone()) else {
            tracing::error!("render requested without a scene");
            return Err(Error::NoScene);
        };

        if self.last_camera != Some(camera) {
            if self.last_camera.is_some() {
                tracing::debug!("camera changed");
                self.invalidation.invalidate();
            }
            self.last_camera = Some(camera);
        }

        let generation = self.invalidation.generation();
        let up_to_date = self
            .photon_map()
            .is_some_and(|map| map.generation() == generation);
        if self.state == PipelineState::PhotonMapReady && !up_to_date {
            transition(&mut self.state, PipelineState::PhotonMapStale);
        }

        let ctx = PipelineContext {
            config: &self.config,
            engine: self.engine.as_ref(),
            scene: scene.as_ref(),
            tracer,
            camera,
            generation,
        };

        if self.state == PipelineState::PhotonMapStale {
            transition(&mut self.state, PipelineState::Building);
            match build_photon_map(&ctx, &self.builder) {
                Ok(map) => {
                    let back = 1 - self.front;
                    tracing::info!(
                        photons = map.total_photons(),
                        generation,
                        "photon map ready"
                    );
                    self.photon_maps[back] = Some(Arc::new(map));
                    self.front = back;
                    self.builds += 1;
                    // an invalidation that arrived mid-build still needs a rebuild next frame
                    if self.invalidation.generation() == generation {
                        transition(&mut self.state, PipelineState::PhotonMapReady);
                    } else {
                        transition(&mut self.state, PipelineState::PhotonMapStale);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "photon map build failed, retrying next frame");
                    transition(&mut self.state, PipelineState::PhotonMapStale);
                    return Err(e);
                }
            }
        }

        let map = self.photon_maps[self.front]
            .clone()
            .ok_or_else(|| Error::Pipeline("no photon map installed".into()))?;

        let resume = self.state;
        transition(&mut self.state, PipelineState::Rendering);
        let slot = (self.frame_count % FRAME_COUNT as u64) as usize;
        let result = render_frame(&ctx, &mut self.frames[slot], map);
        transition(&mut self.state, resume);

        match &result {
            Ok(_) => self.frame_count += 1,
            Err(e) => tracing::warn!(error = %e, "frame abandoned"),
        }
        result
    }
}
