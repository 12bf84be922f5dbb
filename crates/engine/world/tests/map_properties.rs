use std::collections::HashSet;
use vmf::glam::{DVec3, IVec3};
use vmf::{Entity, IdAllocator, Orientation, Output, Solid, Vmf};
use world::{
    Connections, ConnectionsConfig, InstanceLocs, Orient, TemplateLibrary, TemplateMode, TileAddr,
    TileGrid, TileState, TileType, TilingConfig,
};

fn template_map() -> Vmf {
    let mut src = Vmf::new();
    let mut ids = IdAllocator::default();

    let mut brush = Entity::new("bee2_template_world");
    brush.set("template_id", "PEDESTAL");
    brush.solids.push(Solid::cuboid(
        &mut ids,
        DVec3::new(-16.0, -16.0, 0.0),
        DVec3::new(16.0, 48.0, 32.0),
        "metal/pedestal",
    ));
    src.add_entity(brush);

    for (name, origin) in [("button", "0 32 16"), ("@global_lamp", "8 0 64"), ("sound", "-8 0 0")] {
        let mut ent = Entity::new("info_target");
        ent.set("template_id", "pedestal");
        ent.set("targetname", name);
        ent.set("origin", origin);
        ent.outputs.push(Output::new("OnUser1", "sound", "PlaySound"));
        src.add_entity(ent);
    }
    src
}

fn library() -> TemplateLibrary {
    let mut lib = TemplateLibrary::new();
    lib.load(&template_map()).unwrap();
    lib
}

fn placed_origins(vmf: &Vmf, ids: &[vmf::EntityId]) -> Vec<DVec3> {
    ids.iter().map(|id| vmf.entity(*id).origin()).collect()
}

#[test]
fn test_template_translation_is_exact() {
    let mut lib = library();
    let mut vmf = Vmf::new();
    let offset = DVec3::new(384.0, -128.0, 64.0);
    let at_zero = lib
        .instance(&mut vmf, "pedestal", DVec3::ZERO, &Orientation::IDENTITY, "a", TemplateMode::Default)
        .unwrap();
    let moved = lib
        .instance(&mut vmf, "pedestal", offset, &Orientation::IDENTITY, "b", TemplateMode::Default)
        .unwrap();

    let a = placed_origins(&vmf, &at_zero.entities);
    let b = placed_origins(&vmf, &moved.entities);
    for (pa, pb) in a.iter().zip(&b) {
        assert_eq!(*pb - *pa, offset);
    }
    for id in &moved.entities {
        assert_eq!(vmf.entity(*id).get("angles"), Some("0 0 0"));
    }

    let (min_a, max_a) = vmf.world.solids[0].bbox();
    let (min_b, max_b) = vmf.world.solids[1].bbox();
    assert_eq!(min_b - min_a, offset);
    assert_eq!(max_b - max_a, offset);
}

#[test]
fn test_template_rotation_keeps_relative_layout() {
    let mut lib = library();
    for yaw in [90.0, 180.0, 270.0] {
        let mut vmf = Vmf::new();
        let orient = Orientation::from_angles(0.0, yaw, 0.0);
        let origin = DVec3::new(128.0, 256.0, 0.0);
        let placed = lib
            .instance(&mut vmf, "pedestal", origin, &orient, "rot", TemplateMode::Default)
            .unwrap();

        let template = lib.get("pedestal").unwrap();
        for (ent, id) in template.entities.iter().zip(&placed.entities) {
            let expected = orient.rotate(ent.origin()) + origin;
            let got = vmf.entity(*id).origin();
            assert!((got - expected).abs().max_element() < 1e-9, "yaw {yaw}: {got} != {expected}");
            // Axis-aligned rotations land on whole units
            assert_eq!(got, got.round());
        }
    }
}

fn local_names(vmf: &Vmf, ids: &[vmf::EntityId]) -> HashSet<String> {
    ids.iter()
        .map(|id| vmf.entity(*id).targetname().to_string())
        .filter(|n| !n.starts_with('@'))
        .collect()
}

#[test]
fn test_two_placements_share_no_local_names() {
    let mut lib = library();
    let mut vmf = Vmf::new();
    let first = lib
        .instance(&mut vmf, "pedestal", DVec3::ZERO, &Orientation::IDENTITY, "owner_1", TemplateMode::Default)
        .unwrap();
    let second = lib
        .instance(&mut vmf, "pedestal", DVec3::X * 512.0, &Orientation::IDENTITY, "owner_2", TemplateMode::Default)
        .unwrap();

    let a = local_names(&vmf, &first.entities);
    let b = local_names(&vmf, &second.entities);
    assert_eq!(a.len(), 2);
    assert!(a.is_disjoint(&b));

    // Same owner twice still gets distinct names
    let third = lib
        .instance(&mut vmf, "pedestal", DVec3::Y * 512.0, &Orientation::IDENTITY, "owner_1", TemplateMode::Default)
        .unwrap();
    assert!(a.is_disjoint(&local_names(&vmf, &third.entities)));

    // Globals are shared, outputs follow the local rename
    let lamp = vmf.entity(first.entities[1]);
    assert_eq!(lamp.targetname(), "@global_lamp");
    let sound_name = vmf.entity(first.entities[2]).targetname();
    assert_eq!(lamp.outputs[0].target, sound_name);
}

#[test]
fn test_tiles_survive_a_map_round_trip() {
    let mut ids = IdAllocator::default();
    let mut vmf = Vmf::new();
    for x in 0..3 {
        vmf.add_brush(Solid::cuboid_with(
            &mut ids,
            DVec3::new(x as f64 * 128.0, 0.0, -128.0),
            DVec3::new(x as f64 * 128.0 + 128.0, 128.0, 0.0),
            |n| {
                if n == DVec3::Z {
                    "tile/white_floor_tile002a".to_string()
                } else {
                    "tools/toolsnodraw".to_string()
                }
            },
        ));
    }
    let text = vmf.serialize();
    let mut reparsed = Vmf::parse(&text).unwrap();
    let cfg = TilingConfig::default();
    let mut grid = TileGrid::analyse(&mut reparsed, &cfg);
    assert_eq!(grid.len(), 3);

    let addr = TileAddr {
        cell: IVec3::new(1, 0, -1),
        orient: Orient::PosZ,
        u: 1,
        v: 2,
    };
    grid.set(addr, TileState::new(TileType::Black));
    assert_eq!(grid.get(addr), Some(TileState::new(TileType::Black)));
    assert_eq!(
        grid.find_tile(DVec3::new(128.0 + 48.0, 80.0, 0.0), DVec3::Z),
        Some(addr)
    );

    let brushes_a = grid.generate_brushes(&mut reparsed.ids.clone(), &cfg);
    let brushes_b = grid.generate_brushes(&mut reparsed.ids.clone(), &cfg);
    assert_eq!(brushes_a, brushes_b);
    let black = brushes_a
        .iter()
        .filter(|b| b.sides.iter().any(|s| s.material.starts_with("metal/")))
        .count();
    assert_eq!(black, 1);
}

#[test]
fn test_compact_keeps_every_entity_under_the_limit() {
    let mut vmf = Vmf::new();
    let mut button = Entity::new("func_instance");
    button.set("targetname", "button");
    for i in 0..80 {
        let mut panel = Entity::new("func_instance");
        panel.set("targetname", format!("panel_{i}"));
        vmf.add_entity(panel);
        button.outputs.push(Output::new("OnPressed", format!("panel_{i}"), "Extend"));
        button.outputs.push(Output::new("OnUnPressed", format!("panel_{i}"), "Retract"));
    }
    button.outputs.push(Output::new("OnPressed", "@sound", "PlaySound"));
    vmf.add_entity(button);

    let cfg = ConnectionsConfig::default();
    let mut graph = Connections::parse(&vmf, &cfg, &InstanceLocs::new());
    graph.compact(&mut vmf, &cfg).unwrap();
    for (_, ent) in vmf.entities() {
        assert!(ent.outputs.len() <= cfg.max_outputs);
    }
    let text = vmf.serialize();

    let mut again = Vmf::parse(&text).unwrap();
    let mut graph = Connections::parse(&again, &cfg, &InstanceLocs::new());
    assert!(graph.compact(&mut again, &cfg).unwrap().is_empty());
    assert_eq!(again.serialize(), text);
}
