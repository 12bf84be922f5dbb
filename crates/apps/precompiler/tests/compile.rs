use precompiler::{cli, compile, diagnostics, output, CompileConfig, Inputs, RuleFile};
use vmf::glam::DVec3;
use vmf::{Entity, IdAllocator, Output, Solid, Vmf};

fn instance(name: &str, file: &str, origin: &str) -> Entity {
    let mut ent = Entity::new("func_instance");
    ent.set("targetname", name);
    ent.set("file", file);
    ent.set("origin", origin);
    ent.set("angles", "0 0 0");
    ent
}

fn rules(text: &str) -> RuleFile {
    RuleFile::parse("test_rules.txt", text).unwrap()
}

#[test]
fn test_single_instance_is_renamed() {
    let mut map = Vmf::new();
    map.add_entity(instance("foo_1", "instances/foo.vmf", "64 64 0"));

    let inputs = Inputs::new(map).with_rules(rules(
        r#"
        "Condition"
        {
            "type" "AND"
            "HasInstance" "instances/foo.vmf"
            "Result" { "ChangeInstance" "instances/bar.vmf" }
        }
        "#,
    ));
    let compiled = compile(inputs, &CompileConfig::default()).unwrap();
    assert_eq!(compiled.results, 1);

    let text = compiled.vmf.serialize();
    let reparsed = Vmf::parse(&text).unwrap();
    let files: Vec<_> = reparsed
        .by_class("func_instance")
        .map(|(_, e)| e.file().to_string())
        .collect();
    assert_eq!(files, vec!["instances/bar.vmf".to_string()]);
}

#[test]
fn test_templates_are_placed_at_instances() {
    let mut ids = IdAllocator::default();
    let mut templates = Vmf::new();
    let mut brush = Entity::new("bee2_template_world");
    brush.set("template_id", "PEDESTAL");
    brush.solids.push(Solid::cuboid(
        &mut ids,
        DVec3::new(-16.0, -16.0, 0.0),
        DVec3::new(16.0, 16.0, 32.0),
        "metal/pedestal",
    ));
    templates.add_entity(brush);

    let mut map = Vmf::new();
    map.add_entity(instance("ped_1", "instances/pedestal.vmf", "256 0 0"));
    let before = map.world.solids.len();

    let inputs = Inputs::new(map)
        .with_templates(templates)
        .with_rules(rules(
            r#"
            "Condition"
            {
                "Instance" "instances/pedestal.vmf"
                "Result" { "TemplateBrush" { "id" "pedestal" "offset" "0 0 64" } }
            }
            "#,
        ));
    let compiled = compile(inputs, &CompileConfig::default()).unwrap();
    let added = &compiled.vmf.world.solids[before..];
    assert_eq!(added.len(), 1);
    let (min, max) = added[0].bbox();
    assert_eq!(min, DVec3::new(240.0, -16.0, 64.0));
    assert_eq!(max, DVec3::new(272.0, 16.0, 96.0));
}

#[test]
fn test_unknown_template_is_fatal() {
    let mut map = Vmf::new();
    map.add_entity(instance("ped_1", "instances/pedestal.vmf", "0 0 0"));
    let inputs = Inputs::new(map).with_rules(rules(
        r#""Condition" { "Result" { "TemplateBrush" "MISSING" } }"#,
    ));
    let err = compile(inputs, &CompileConfig::default()).unwrap_err();
    assert!(err.user_error().is_none());
    assert!(err.to_string().contains("MISSING"));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compile_error.json");
    let user = diagnostics::report_compile_error(&path, &err).unwrap();
    assert_eq!(user.context, "Configuration");
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("MISSING"));
}

#[test]
fn test_logic_loop_is_reported_for_the_viewer() {
    let mut ids = IdAllocator::default();
    let mut map = Vmf::new();
    map.world.solids.push(Solid::cuboid(
        &mut ids,
        DVec3::new(0.0, 0.0, -128.0),
        DVec3::new(128.0, 128.0, 0.0),
        "tile/white_floor_tile002a",
    ));
    let mut gate = instance("gate", "instances/and_gate.vmf", "0 0 0");
    gate.outputs.push(Output::new("OnTrigger", "gate", "Trigger"));
    map.add_entity(gate);

    let cfg = CompileConfig::from_toml_str(
        r#"
        [connections]
        pass_through = ["instances/and_gate.vmf"]
        "#,
    )
    .unwrap();
    let err = compile(Inputs::new(map), &cfg).unwrap_err();
    let user = err.user_error().expect("a map error");
    assert!(user.message.contains("loop"));
    // Every face of the tiled voxel is in the snapshot
    assert_eq!(user.faces.get("white").map(Vec::len), Some(6));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compile_error.json");
    diagnostics::report_compile_error(&path, &err).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("form a loop"));
    assert!(text.contains("\"white\""));
}

#[test]
fn test_files_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let map_path = dir.path().join("chamber.vmf");
    let rules_path = dir.path().join("rules.txt");

    let mut map = Vmf::new();
    map.add_entity(instance("light_1", "instances/light.vmf", "0 0 128"));
    std::fs::write(&map_path, map.serialize()).unwrap();
    std::fs::write(
        &rules_path,
        r#""Condition" { "Instance" "instances/light.vmf" "Result" { "SetInstVar" "$colour warm" } }"#,
    )
    .unwrap();

    let inputs = Inputs::load(&map_path, &[&rules_path], None).unwrap();
    assert_eq!(inputs.rules[0].source, "rules.txt");
    let compiled = compile(inputs, &CompileConfig::default()).unwrap();

    let out = cli::default_output(&map_path);
    output::write_atomic(&out, compiled.vmf.serialize().as_bytes()).unwrap();
    assert_eq!(out, dir.path().join("styled").join("chamber.vmf"));

    let written = Vmf::parse(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let (_, light) = written.by_class("func_instance").next().unwrap();
    assert_eq!(light.fixups.get("colour"), Some("warm"));
}
