// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{
    CullKernel, CullingError, CullingSource, CullingState, CullingUniforms, DepthPyramid,
    GenerateDrawsKernel, VisibilityCulling,
};
use lumen_core::renderer::IndirectDraw;
use lumen_core::stage::{
    ExecutionClass, StageContext, StageDescriptor, StageError, StageFlags, StageId,
    StageScheduler,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Stage names, in registration order.
pub const UPDATE_CULLING_DATA: &str = "update-culling-data";
pub const UPLOAD_CAMERA_FRUSTUM: &str = "upload-camera-frustum";
pub const DISPATCH_VISIBILITY_CULLING: &str = "dispatch-visibility-culling";
pub const READ_BACK_VISIBLE_COUNT: &str = "read-back-visible-count";
pub const FETCH_VISIBLE_COUNT: &str = "fetch-visible-count";
pub const GENERATE_INDIRECT_DRAWS: &str = "generate-indirect-draws";
pub const DRAW_VISIBLE_ENTITIES: &str = "draw-visible-entities";
pub const BUILD_DEPTH_PYRAMID: &str = "build-depth-pyramid";

type SharedSource = Rc<RefCell<dyn CullingSource>>;
type SharedState = Rc<RefCell<CullingState>>;

impl VisibilityCulling {
    /// Registers the lane's per-camera stages on `scheduler`.
    ///
    /// The stages cull the entities of `source` for every camera of the frame,
    /// draw the survivors into the camera's framebuffer and keep a depth
    /// pyramid for the next frame's occlusion test.
    pub fn register_stages(
        &self,
        scheduler: &mut StageScheduler,
        source: SharedSource,
    ) -> Result<Vec<StageId>, StageError> {
        let mut ids = Vec::with_capacity(8);

        let (state, src) = (self.state.clone(), source.clone());
        ids.push(scheduler.register_stage(StageDescriptor::new(
            UPDATE_CULLING_DATA,
            ExecutionClass::PerCamera,
            move |ctx| update_culling_data(ctx, &state, &src),
        ))?);

        let state = self.state.clone();
        ids.push(scheduler.register_stage(StageDescriptor::new(
            UPLOAD_CAMERA_FRUSTUM,
            ExecutionClass::PerCamera,
            move |ctx| upload_camera_frustum(ctx, &state),
        ))?);

        let (state, src) = (self.state.clone(), source.clone());
        ids.push(scheduler.register_stage(StageDescriptor::new(
            DISPATCH_VISIBILITY_CULLING,
            ExecutionClass::PerCamera,
            move |ctx| dispatch_visibility_culling(ctx, &state, &src),
        ))?);

        let state = self.state.clone();
        ids.push(scheduler.register_stage(StageDescriptor::new(
            READ_BACK_VISIBLE_COUNT,
            ExecutionClass::PerCamera,
            move |ctx| {
                state.borrow_mut().readback.submit(ctx.device)?;
                Ok(())
            },
        ))?);

        let (state, ready) = (self.state.clone(), self.state.clone());
        ids.push(scheduler.register_stage(
            StageDescriptor::new(
                FETCH_VISIBLE_COUNT,
                ExecutionClass::PerCamera,
                move |ctx| fetch_visible_count(ctx, &state),
            )
            .with_readiness(move |ctx| {
                let state = ready.borrow();
                state.readback.poll(ctx.device, state.config.fence_timeout)
            }),
        )?);

        let (state, src) = (self.state.clone(), source.clone());
        ids.push(scheduler.register_stage(StageDescriptor::new(
            GENERATE_INDIRECT_DRAWS,
            ExecutionClass::PerCamera,
            move |ctx| generate_indirect_draws(ctx, &state, &src),
        ))?);

        let (state, src) = (self.state.clone(), source);
        ids.push(scheduler.register_stage(
            StageDescriptor::new(
                DRAW_VISIBLE_ENTITIES,
                ExecutionClass::PerCameraWithFramebuffer,
                move |ctx| draw_visible_entities(ctx, &state, &src),
            )
            .with_flags(StageFlags::SYNCHRONIZE_PIPELINES),
        )?);

        let state = self.state.clone();
        ids.push(scheduler.register_stage(StageDescriptor::new(
            BUILD_DEPTH_PYRAMID,
            ExecutionClass::PerCameraWithFramebuffer,
            move |ctx| build_depth_pyramid(ctx, &state),
        ))?);

        log::debug!(
            "Registered {} culling stages on pipeline '{}'",
            ids.len(),
            scheduler.name()
        );
        Ok(ids)
    }
}

fn update_culling_data(
    ctx: &StageContext<'_>,
    state: &SharedState,
    source: &SharedSource,
) -> Result<(), StageError> {
    let (index, _) = ctx.current_camera()?;
    let inputs = source.borrow().culling_inputs()?;
    let mut state = state.borrow_mut();
    let camera = state.camera_mut(ctx.device, index)?;
    camera.visible_ids.ensure(ctx.device, inputs.entity_count)?;
    camera.entity_count = inputs.entity_count;
    Ok(())
}

fn upload_camera_frustum(ctx: &StageContext<'_>, state: &SharedState) -> Result<(), StageError> {
    let (index, view) = ctx.current_camera()?;
    let mut state = state.borrow_mut();
    let occlusion = state.config.occlusion;
    let camera = state.camera_mut(ctx.device, index)?;
    let uniforms = CullingUniforms::new(view, camera.entity_count, camera.pyramid.as_ref(), occlusion);

    ctx.device
        .write_buffer(state.uniforms, 0, bytemuck::bytes_of(&uniforms))?;
    state.readback.reset(ctx.device)?;
    Ok(())
}

fn dispatch_visibility_culling(
    ctx: &StageContext<'_>,
    state: &SharedState,
    source: &SharedSource,
) -> Result<(), StageError> {
    let (index, _) = ctx.current_camera()?;
    let inputs = source.borrow().culling_inputs()?;
    let mut state = state.borrow_mut();
    let workgroup_size = state.config.workgroup_size;
    let (uniforms, counter) = (state.uniforms, state.readback.counter());
    let camera = state.camera_mut(ctx.device, index)?;
    if camera.entity_count == 0 {
        return Ok(());
    }

    let kernel = CullKernel {
        uniforms,
        transforms: inputs.transforms,
        bounds: inputs.bounds,
        visible_ids: camera.visible_ids.buffer,
        counter,
        pyramid: camera.pyramid.as_ref().map(DepthPyramid::buffer),
        workgroup_size,
    };
    ctx.device
        .dispatch_compute(&kernel, camera.entity_count.div_ceil(workgroup_size))?;
    ctx.device.memory_barrier();
    Ok(())
}

fn fetch_visible_count(ctx: &StageContext<'_>, state: &SharedState) -> Result<(), StageError> {
    let (index, _) = ctx.current_camera()?;
    let mut state = state.borrow_mut();
    let budget = state.config.fence_timeout;
    let count = state
        .readback
        .wait(ctx.device, budget)?
        .read_count(ctx.device)
        .map_err(CullingError::from)?;

    let camera = state.camera_mut(ctx.device, index)?;
    camera.indirect.ensure(ctx.device, count)?;
    camera.visible_count = count;
    log::trace!("Camera {index}: {count} of {} entities visible", camera.entity_count);
    Ok(())
}

fn generate_indirect_draws(
    ctx: &StageContext<'_>,
    state: &SharedState,
    source: &SharedSource,
) -> Result<(), StageError> {
    let (index, _) = ctx.current_camera()?;
    let inputs = source.borrow().culling_inputs()?;
    let mut state = state.borrow_mut();
    let workgroup_size = state.config.workgroup_size;
    let camera = state.camera_mut(ctx.device, index)?;

    if camera.visible_count > 0 {
        let kernel = GenerateDrawsKernel {
            visible_ids: camera.visible_ids.buffer,
            visible_count: camera.visible_count,
            mesh_refs: inputs.mesh_refs,
            mesh_infos: inputs.mesh_infos,
            indirect: camera.indirect.buffer,
            workgroup_size,
        };
        ctx.device
            .dispatch_compute(&kernel, camera.visible_count.div_ceil(workgroup_size))?;
    }
    ctx.device.memory_barrier();
    Ok(())
}

fn draw_visible_entities(
    ctx: &StageContext<'_>,
    state: &SharedState,
    source: &SharedSource,
) -> Result<(), StageError> {
    let (index, _) = ctx.current_camera()?;
    let inputs = source.borrow().culling_inputs()?;
    let mut state = state.borrow_mut();
    let camera = state.camera_mut(ctx.device, index)?;
    if camera.visible_count == 0 {
        return Ok(());
    }
    ctx.device.draw_indexed_indirect(&IndirectDraw {
        commands: camera.indirect.buffer,
        draw_count: camera.visible_count,
        vertex_buffer: inputs.vertex_buffer,
        index_buffer: inputs.index_buffer,
    })?;
    Ok(())
}

fn build_depth_pyramid(ctx: &StageContext<'_>, state: &SharedState) -> Result<(), StageError> {
    let (index, view) = ctx.current_camera()?;
    let mut state = state.borrow_mut();
    if !state.config.occlusion {
        return Ok(());
    }
    let Some(source) = view.depth_source() else {
        return Ok(());
    };
    let workgroup_size = state.config.workgroup_size;
    let camera = state.camera_mut(ctx.device, index)?;

    if !camera.pyramid.as_ref().is_some_and(|p| p.matches(&source)) {
        if let Some(stale) = camera.pyramid.take() {
            stale.destroy(ctx.device)?;
        }
        camera.pyramid = Some(DepthPyramid::new(ctx.device, source.width, source.height)?);
    }
    if let Some(pyramid) = &camera.pyramid {
        pyramid.build(ctx.device, &source, workgroup_size)?;
    }
    Ok(())
}
