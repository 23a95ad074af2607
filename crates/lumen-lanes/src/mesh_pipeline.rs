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

//! A GPU-driven mesh pipeline: entities with a transform, bounds and mesh,
//! culled and drawn with one indirect draw per camera.

use crate::culling_lane::{
    CullingConfig, CullingError, CullingInputs, CullingSource, VisibilityCulling,
    VisibleEntities,
};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use lumen_core::math::BoundingSphere;
use lumen_core::renderer::{GpuDevice, ResourceError};
use lumen_core::stage::{ExecutionClass, StageDescriptor, StageError, StageScheduler};
use lumen_data::buffers::{
    AttributeSlot, BufferError, EntityBufferManager, EntityCounter, GpuAttributeBuffer,
    UpdatePhase,
};
use lumen_data::mesh_pool::{MeshId, MeshPool, MeshPoolDescriptor, MeshPoolError};
use lumen_data::EntityHandle;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Global stage compacting the entity buffers.
pub const COMPACT_ENTITY_BUFFERS: &str = "compact-entity-buffers";
/// Global stage uploading pending attribute and mesh edits.
pub const FLUSH_ENTITY_BUFFERS: &str = "flush-entity-buffers";

/// Per-entity mesh reference as stored on the GPU. Zero means "no mesh".
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshRef(u32);

impl MeshRef {
    /// No mesh; the entity produces an empty draw.
    pub const NONE: Self = Self(0);

    /// Reference to `mesh`.
    pub fn new(mesh: MeshId) -> Self {
        Self(mesh.0.wrapping_add(1))
    }

    /// The referenced mesh, if any.
    pub fn mesh(self) -> Option<MeshId> {
        self.0.checked_sub(1).map(MeshId)
    }
}

/// Errors raised by [`MeshPipeline`].
#[derive(Debug, thiserror::Error)]
pub enum MeshPipelineError {
    /// An entity attribute operation failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// A mesh operation failed.
    #[error(transparent)]
    MeshPool(#[from] MeshPoolError),
    /// The culling lane could not be created.
    #[error(transparent)]
    Culling(#[from] CullingError),
    /// The device rejected a command.
    #[error("device error: {0}")]
    Resource(#[from] ResourceError),
}

/// Sizes and tuning of a [`MeshPipeline`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshPipelineConfig {
    /// Culling lane settings.
    pub culling: CullingConfig,
    /// Initial capacity of every entity attribute buffer.
    pub initial_entity_capacity: u32,
    /// Mesh pool sizes.
    pub mesh_pool: MeshPoolDescriptor,
}

impl Default for MeshPipelineConfig {
    fn default() -> Self {
        Self {
            culling: CullingConfig::default(),
            initial_entity_capacity: 1024,
            mesh_pool: MeshPoolDescriptor::default(),
        }
    }
}

struct MeshScene {
    device: Arc<dyn GpuDevice>,
    entities: EntityBufferManager,
    transforms: AttributeSlot,
    bounds: AttributeSlot,
    mesh_refs: AttributeSlot,
    meshes: MeshPool,
}

impl CullingSource for MeshScene {
    fn culling_inputs(&self) -> Result<CullingInputs, CullingError> {
        Ok(CullingInputs {
            entity_count: self.entities.live_count(),
            transforms: self.entities.attribute(self.transforms)?.gpu_buffer(),
            bounds: self.entities.attribute(self.bounds)?.gpu_buffer(),
            mesh_refs: self.entities.attribute(self.mesh_refs)?.gpu_buffer(),
            mesh_infos: self.meshes.info_buffer(),
            vertex_buffer: self.meshes.vertex_buffer(),
            index_buffer: self.meshes.index_buffer(),
        })
    }
}

/// Entities, meshes and their culling lane, driven as stages of one pipeline.
///
/// Mutations between frames go to CPU mirrors; the pipeline's global stages
/// compact and upload them, then the culling stages run for every camera.
pub struct MeshPipeline {
    scene: Rc<RefCell<MeshScene>>,
    culling: VisibilityCulling,
}

impl MeshPipeline {
    /// Creates the attribute buffers, mesh pool and culling lane on `device`.
    ///
    /// Entity creations are reported to `counter`, which may be shared with
    /// other pipelines.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        counter: EntityCounter,
        config: MeshPipelineConfig,
    ) -> Result<Self, MeshPipelineError> {
        let capacity = config.initial_entity_capacity;
        let mut entities = EntityBufferManager::new(counter);
        let transforms = GpuAttributeBuffer::<Mat4>::new(device.as_ref(), "entity-transforms", capacity)?;
        let transforms = entities.register_buffer(device.as_ref(), Box::new(transforms))?;
        let bounds =
            GpuAttributeBuffer::<BoundingSphere>::new(device.as_ref(), "entity-bounds", capacity)?;
        let bounds = entities.register_buffer(device.as_ref(), Box::new(bounds))?;
        let mesh_refs = GpuAttributeBuffer::<MeshRef>::new(device.as_ref(), "entity-meshes", capacity)?;
        let mesh_refs = entities.register_buffer(device.as_ref(), Box::new(mesh_refs))?;
        let meshes = MeshPool::new(device.clone(), config.mesh_pool)?;
        let culling = VisibilityCulling::new(device.as_ref(), config.culling)?;

        Ok(Self {
            scene: Rc::new(RefCell::new(MeshScene {
                device,
                entities,
                transforms,
                bounds,
                mesh_refs,
                meshes,
            })),
            culling,
        })
    }

    /// Registers the pipeline's stages on `scheduler`.
    pub fn register(&self, scheduler: &mut StageScheduler) -> Result<(), StageError> {
        let scene = self.scene.clone();
        scheduler.register_stage(StageDescriptor::new(
            COMPACT_ENTITY_BUFFERS,
            ExecutionClass::Global,
            move |ctx| {
                let mut scene = scene.borrow_mut();
                let moves = scene
                    .entities
                    .update_buffers(ctx.device, UpdatePhase::Compact)
                    .map_err(StageError::execution)?;
                if moves > 0 {
                    log::trace!("Compaction moved {moves} entities");
                }
                Ok(())
            },
        ))?;

        let scene = self.scene.clone();
        scheduler.register_stage(StageDescriptor::new(
            FLUSH_ENTITY_BUFFERS,
            ExecutionClass::Global,
            move |ctx| {
                let mut scene = scene.borrow_mut();
                scene
                    .entities
                    .update_buffers(ctx.device, UpdatePhase::Flush)
                    .map_err(StageError::execution)?;
                scene.meshes.flush().map_err(StageError::execution)?;
                Ok(())
            },
        ))?;

        let source: Rc<RefCell<dyn CullingSource>> = self.scene.clone();
        self.culling.register_stages(scheduler, source)?;
        Ok(())
    }

    /// Uploads a mesh into the shared pools.
    pub fn upload_mesh<V: Pod>(
        &self,
        vertices: &[V],
        indices: &[u32],
        bounds: BoundingSphere,
    ) -> Result<MeshId, MeshPipelineError> {
        Ok(self
            .scene
            .borrow_mut()
            .meshes
            .upload_mesh(vertices, indices, bounds)?)
    }

    /// Frees a mesh and detaches it from every entity that used it.
    ///
    /// Those entities keep their slot and draw nothing until they are given a
    /// new mesh, even after the id is handed out again.
    pub fn remove_mesh(&self, mesh: MeshId) -> Result<(), MeshPipelineError> {
        let mut scene = self.scene.borrow_mut();
        scene.meshes.remove_mesh(mesh)?;

        let slot = scene.mesh_refs;
        let refs = scene
            .entities
            .buffer_mut::<GpuAttributeBuffer<MeshRef>>(slot)?;
        let removed = MeshRef::new(mesh);
        let stale: Vec<u32> = refs
            .as_slice()
            .iter()
            .enumerate()
            .filter(|(_, mesh_ref)| **mesh_ref == removed)
            .map(|(offset, _)| offset as u32)
            .collect();
        for &offset in &stale {
            refs.set(offset, MeshRef::NONE)?;
        }
        if !stale.is_empty() {
            log::debug!("Removed {mesh:?} from {} entities", stale.len());
        }
        Ok(())
    }

    /// Creates an entity with an identity transform and no mesh.
    pub fn create_entity(&self) -> Result<EntityHandle, MeshPipelineError> {
        let mut scene = self.scene.borrow_mut();
        let scene = &mut *scene;
        let handle = scene.entities.create_entity(scene.device.as_ref())?;
        scene
            .entities
            .set_attribute(scene.transforms, handle, Mat4::IDENTITY)?;
        scene
            .entities
            .set_attribute(scene.bounds, handle, BoundingSphere::default())?;
        scene
            .entities
            .set_attribute(scene.mesh_refs, handle, MeshRef::NONE)?;
        Ok(handle)
    }

    /// Deletes an entity; its slot is reclaimed by the next compaction.
    pub fn delete_entity(&self, handle: EntityHandle) -> Result<(), MeshPipelineError> {
        Ok(self.scene.borrow_mut().entities.delete_entity(handle)?)
    }

    /// Sets an entity's model matrix.
    pub fn set_transform(
        &self,
        handle: EntityHandle,
        transform: Mat4,
    ) -> Result<(), MeshPipelineError> {
        let mut scene = self.scene.borrow_mut();
        let slot = scene.transforms;
        Ok(scene.entities.set_attribute(slot, handle, transform)?)
    }

    /// Assigns a mesh; the entity takes the mesh's bounds.
    pub fn set_mesh(&self, handle: EntityHandle, mesh: MeshId) -> Result<(), MeshPipelineError> {
        let mut scene = self.scene.borrow_mut();
        let info = scene
            .meshes
            .mesh_info(mesh)
            .ok_or(MeshPoolError::UnknownMesh(mesh))?;
        let (refs, bounds) = (scene.mesh_refs, scene.bounds);
        scene.entities.set_attribute(refs, handle, MeshRef::new(mesh))?;
        scene.entities.set_attribute(bounds, handle, info.bounds)?;
        Ok(())
    }

    /// Overrides an entity's object-space bounds.
    pub fn set_bounds(
        &self,
        handle: EntityHandle,
        bounds: BoundingSphere,
    ) -> Result<(), MeshPipelineError> {
        let mut scene = self.scene.borrow_mut();
        let slot = scene.bounds;
        Ok(scene.entities.set_attribute(slot, handle, bounds)?)
    }

    /// Current dense offset of an entity.
    pub fn offset_of(&self, handle: EntityHandle) -> Result<u32, MeshPipelineError> {
        Ok(self.scene.borrow().entities.offset_of(handle)?)
    }

    /// Number of live entities.
    pub fn live_count(&self) -> u32 {
        self.scene.borrow().entities.live_count()
    }

    /// Number of meshes in the pool.
    pub fn mesh_count(&self) -> usize {
        self.scene.borrow().meshes.mesh_count()
    }

    /// Visible entities and draw commands produced for `camera` last frame.
    pub fn entities_to_render(&self, camera: usize) -> Option<VisibleEntities> {
        self.culling.visible_entities(camera)
    }

    /// Number of entities visible from `camera` last frame.
    pub fn entities_count(&self, camera: usize) -> u32 {
        self.culling.visible_count(camera)
    }

    /// The pipeline's culling lane.
    pub fn culling(&self) -> &VisibilityCulling {
        &self.culling
    }
}

impl std::fmt::Debug for MeshPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scene = self.scene.borrow();
        f.debug_struct("MeshPipeline")
            .field("entities", &scene.entities)
            .field("meshes", &scene.meshes)
            .field("culling", &self.culling)
            .finish()
    }
}
