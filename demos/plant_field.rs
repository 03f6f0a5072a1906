use std::time::Duration;

use canopy_instancing::*;

/// Prints zone traffic as the camera walks the field.
struct PrintingLoader;

impl AssetGroupLoader for PrintingLoader {
    fn name(&self) -> &str {
        "printing-loader"
    }

    fn load_zone(&mut self, zone: ZoneCoord, _bounds: &Aabb) -> Result<()> {
        println!("  load zone {zone:?}");
        Ok(())
    }

    fn unload_zone(&mut self, zone: ZoneCoord) {
        println!("  unload zone {zone:?}");
    }
}

/// Fills one zone with rows of plants, two units apart.
fn plant_zone(engine: &mut CanopyEngine, zone: ZoneCoord, zone_size: f32) -> Result<usize> {
    let per_side = (zone_size / 2.0) as i32;
    let origin = Vec3::new(zone.x as f32 * zone_size, 0.0, zone.z as f32 * zone_size);
    let mut planted = 0;
    for row in 0..per_side {
        for col in 0..per_side {
            let seed = (zone.x * 31 + zone.z * 17 + row * per_side + col).unsigned_abs();
            let category = GrowthCategory::ALL[seed as usize % GrowthCategory::ALL.len()];
            let position = origin + Vec3::new(col as f32 * 2.0 + 1.0, 0.0, row as f32 * 2.0 + 1.0);
            let descriptor = InstanceDescriptor::new(MeshId(seed % 3), MaterialId(seed % 2), category)
                .at(position)
                .with_variant(u64::from(seed));
            engine.register(descriptor)?;
            planted += 1;
        }
    }
    Ok(planted)
}

fn main() -> Result<()> {
    let camera = SharedCamera::new(CameraState::perspective(
        Vec3::new(0.0, 2.0, 0.0),
        Quat::IDENTITY,
        65f32.to_radians(),
        16.0 / 9.0,
        0.1,
        400.0,
    ));
    let services = EngineServices::headless(camera.clone()).with_loader(PrintingLoader);
    let mut engine = CanopyEngine::new(EngineConfig::default(), services)?;
    for mesh in 0..3 {
        engine.register_mesh(
            MeshId(mesh),
            MeshInfo {
                index_count: 240 + mesh * 60,
                ..MeshInfo::default()
            },
        );
    }

    // Zones are planted as they stream in; planting outside the streaming radius would
    // be destroyed on the next tick.
    let zone_size = engine.config().zones.zone_size;
    let mut planted = 0;

    for frame in 0..240u32 {
        camera.set_position(Vec3::new(0.0, 2.0, -(frame as f32) * 0.5));
        // Pretend the scene gets heavier halfway through.
        let frame_time = if frame > 120 && frame < 150 {
            Duration::from_millis(28)
        } else {
            Duration::from_millis(12)
        };
        let report = engine.frame(frame_time);
        if let Some(stream) = &report.stream {
            for zone in &stream.loaded {
                planted += plant_zone(&mut engine, *zone, zone_size)?;
            }
        }
        if let Some(change) = report.quality_change {
            println!("frame {}: quality {:?} -> {:?}", report.frame, change.from, change.to);
        }
        if frame % 30 == 0 {
            println!("frame {:>3}: {}", report.frame, engine.metrics().format_compact());
        }
    }

    println!("planted {planted} instances in total");
    println!("final: {}", engine.metrics().format_compact());
    Ok(())
}
