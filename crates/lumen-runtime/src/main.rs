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

//! Headless demo: a few thousand entities, two cameras, several frames.
//!
//! Usage: `lumen-runtime [config.ron]`

use anyhow::{Context, Result};
use glam::Quat;
use lumen_sdk::prelude::*;
use std::sync::Arc;

const ENTITY_COUNT: u32 = 4096;
const FRAME_COUNT: u32 = 6;
const GRID: u32 = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    normal: [f32; 3],
    uv: [f32; 2],
}

const CUBE_CORNERS: [[f32; 3]; 8] = [
    [-0.5, -0.5, -0.5],
    [0.5, -0.5, -0.5],
    [0.5, 0.5, -0.5],
    [-0.5, 0.5, -0.5],
    [-0.5, -0.5, 0.5],
    [0.5, -0.5, 0.5],
    [0.5, 0.5, 0.5],
    [-0.5, 0.5, 0.5],
];

const CUBE_INDICES: [u32; 36] = [
    0, 2, 1, 0, 3, 2, // back
    4, 5, 6, 4, 6, 7, // front
    0, 1, 5, 0, 5, 4, // bottom
    3, 7, 6, 3, 6, 2, // top
    0, 4, 7, 0, 7, 3, // left
    1, 2, 6, 1, 6, 5, // right
];

fn cube_vertices() -> Vec<Vertex> {
    CUBE_CORNERS
        .iter()
        .map(|&position| Vertex {
            position,
            normal: Vec3::from_array(position).normalize().to_array(),
            uv: [position[0] + 0.5, position[1] + 0.5],
        })
        .collect()
}

fn camera(eye: Vec3, target: Vec3, framebuffer: u64) -> CameraSnapshot {
    let projection = Mat4::perspective_rh(70f32.to_radians(), 16.0 / 9.0, 0.1, 150.0);
    let view = Mat4::look_at_rh(eye, target, Vec3::Y);
    CameraSnapshot::new(projection * view, UVec2::new(1280, 720))
        .with_framebuffer(FramebufferId(framebuffer))
}

fn load_config() -> Result<EngineConfig> {
    match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<()> {
    let config = load_config()?;
    init_logging(&config.log_filter);

    let device = SoftwareDevice::new().with_fence_latency(1);
    let mut engine = RenderEngine::new(Arc::new(device.clone()), config)?;
    let scene = engine.add_mesh_pipeline("scene")?;
    let pipeline = engine
        .mesh_pipeline(scene)
        .context("Scene pipeline is missing")?;

    let cube = pipeline.upload_mesh(
        &cube_vertices(),
        &CUBE_INDICES,
        BoundingSphere::new(Vec3::ZERO, 0.87),
    )?;

    log::info!("Spawning {ENTITY_COUNT} entities...");
    let mut entities = Vec::with_capacity(ENTITY_COUNT as usize);
    for i in 0..ENTITY_COUNT {
        let entity = pipeline.create_entity()?;
        let position = Vec3::new(
            (i % GRID) as f32 * 2.0 - GRID as f32,
            ((i / GRID) % 8) as f32 * 2.0 - 8.0,
            -((i / (GRID * 8)) as f32) * 12.0 - 5.0,
        );
        let rotation = Quat::from_rotation_y(i as f32 * 0.1);
        pipeline.set_mesh(entity, cube)?;
        pipeline.set_transform(
            entity,
            Mat4::from_scale_rotation_translation(Vec3::ONE, rotation, position),
        )?;
        entities.push(entity);
    }

    let mut main_camera = camera(Vec3::new(0.0, 2.0, 10.0), Vec3::new(0.0, 0.0, -40.0), 1);
    let side_camera = camera(Vec3::new(-80.0, 10.0, -40.0), Vec3::new(0.0, 0.0, -40.0), 2);

    for frame in 0..FRAME_COUNT {
        engine.set_cameras(vec![
            Box::new(main_camera.clone()),
            Box::new(side_camera.clone()),
        ]);
        let report = engine.render_frame()?;
        engine.log_frame_summary(&report);

        let draws = device.take_draw_log();
        log::info!("Frame {frame}: {} indirect draws issued", draws.len());

        // Thin the scene out from the back and pan the main camera.
        let pipeline = engine
            .mesh_pipeline(scene)
            .context("Scene pipeline is missing")?;
        for entity in entities.drain(entities.len().saturating_sub(256)..) {
            pipeline.delete_entity(entity)?;
        }
        let eye = Vec3::new(frame as f32 * 4.0, 2.0, 10.0);
        let projection = Mat4::perspective_rh(70f32.to_radians(), 16.0 / 9.0, 0.1, 150.0);
        let view = Mat4::look_at_rh(eye, eye + Vec3::new(0.0, -0.05, -1.0), Vec3::Y);
        main_camera.advance(projection * view);
    }

    let stats = device.stats();
    log::info!(
        "Done: {} entities created, {} dispatches, {} draws, {} fence waits forced, peak {} KiB",
        engine.entities_created(),
        stats.dispatches,
        stats.draws,
        stats.finishes,
        stats.peak_allocated_bytes / 1024
    );
    Ok(())
}
