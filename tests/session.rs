//! End-to-end tests: scripts run through a session and frames are recorded
//! without a GPU.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shaderbench::logging::MemoryLogger;
use shaderbench::property::{PropertyKind, ScalarProperty, ScalarValue, UserProperty};
use shaderbench::render::{FrameCommand, RecordingBackend, TargetRef};
use shaderbench::scene::Scene;
use shaderbench::script_diagnostics::ScriptDiagnosticKind;
use shaderbench::shader::reflection::BindPoint;
use shaderbench::view::ViewInfo;
use shaderbench::workspace::DirectoryWorkspace;
use shaderbench::{BenchConfig, FrameStatus, RunOutcome, RunRequest, RunState, Script, ScriptSession};

const WAIT: Duration = Duration::from_secs(30);

const RADIUS_SHADER: &str = r#"
struct Globals {
    Radius: f32,
};

@group(0) @binding(0) var<uniform> globals: Globals;

@vertex
fn vs(@location(0) p: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(p * globals.Radius, 1.0);
}
"#;

fn session() -> ScriptSession {
    let session = ScriptSession::new(
        BenchConfig::default(),
        Arc::new(MemoryLogger::new()),
        Arc::new(DirectoryWorkspace::new(env!("CARGO_MANIFEST_DIR"))),
    );
    session.set_scene(Some(Arc::new(Scene::demo())));
    session
}

fn script(text: &str) -> Arc<Script> {
    Arc::new(Script::inline(text).with_global("SOURCE", RADIUS_SHADER.to_string()))
}

fn run(session: &ScriptSession, text: &str) -> RunOutcome {
    assert_eq!(session.run(script(text)), RunRequest::Started);
    session.wait_for_completion(WAIT).expect("run finished")
}

fn render(session: &ScriptSession) -> Vec<FrameCommand> {
    let mut backend = RecordingBackend::new();
    let status = session.render_frame(ViewInfo::default(), &mut backend).unwrap();
    assert_ne!(status, FrameStatus::Faulted, "{:?}", session.take_diagnostics());
    backend.last_frame().unwrap().commands
}

/// The radius the first draw of the frame saw.
fn drawn_radius(commands: &[FrameCommand]) -> f32 {
    let draw = commands
        .iter()
        .find_map(|c| match c {
            FrameCommand::Draw(draw) => Some(draw),
            _ => None,
        })
        .expect("a draw");
    let bytes = draw.items[0]
        .vertex
        .buffer_at(BindPoint { group: 0, binding: 0 })
        .expect("uniform buffer");
    f32::from_le_bytes(bytes[0..4].try_into().unwrap())
}

fn set_float(property: &dyn UserProperty, value: f32) {
    match property.kind() {
        PropertyKind::Scalar(scalar) => scalar.set(ScalarValue::Float(value)).unwrap(),
        _ => panic!("{} is not a scalar", property.name()),
    }
}

fn get_float(property: &dyn UserProperty) -> f32 {
    match property.kind() {
        PropertyKind::Scalar(scalar) => scalar.get().as_f32().unwrap(),
        _ => panic!("{} is not a scalar", property.name()),
    }
}

const RADIUS_SCRIPT: &str = r#"
let radius = ri.add_user_var_float("Radius", 20.0);
let vs = ri.compile_shader_source(SOURCE, "vs", "vs_5_0");
vs.find_constant_variable("Radius").set(radius);
ri.set_frame_callback(|ctx| { ctx.draw_sphere(vs, ()); });
"#;

#[test]
fn test_user_var_feeds_shader_constant() {
    let session = session();
    assert_eq!(run(&session, RADIUS_SCRIPT).state, RunState::Succeeded);
    assert_eq!(drawn_radius(&render(&session)), 20.0);

    let radius = session.property("Radius").expect("Radius property");
    set_float(radius.as_ref(), 5.0);
    assert_eq!(drawn_radius(&render(&session)), 5.0);
}

#[test]
fn test_property_survives_rerun() {
    let session = session();
    run(&session, RADIUS_SCRIPT);
    set_float(session.property("Radius").unwrap().as_ref(), 3.0);

    assert_eq!(session.rerun_last(), RunRequest::Started);
    session.wait_for_completion(WAIT).unwrap();
    assert_eq!(get_float(session.property("Radius").unwrap().as_ref()), 3.0);
    assert_eq!(drawn_radius(&render(&session)), 3.0);
}

fn vector_values(session: &ScriptSession, name: &str) -> Vec<f32> {
    match session.property(name).expect("property").kind() {
        PropertyKind::Vector(vector) => vector.values_f32(),
        _ => panic!("{name} is not a vector"),
    }
}

#[test]
fn test_vector_edit_survives_growing_to_more_components() {
    let session = session();
    run(&session, r#"ri.add_user_var_float3("Tint", [0.0, 0.0, 0.0]);"#);
    match session.property("Tint").unwrap().kind() {
        PropertyKind::Vector(vector) => {
            vector.components()[0].set(ScalarValue::Float(0.5)).unwrap();
            vector.components()[2].set(ScalarValue::Float(0.25)).unwrap();
        }
        _ => panic!("Tint is not a vector"),
    }

    run(&session, r#"ri.add_user_var_float4("Tint", [1.0, 1.0, 1.0, 9.0]);"#);
    assert_eq!(vector_values(&session, "Tint"), vec![0.5, 0.0, 0.25, 9.0]);
}

#[test]
fn test_property_change_requests_redraw() {
    let session = session();
    run(&session, RADIUS_SCRIPT);

    let redraws = Arc::new(AtomicUsize::new(0));
    let counter = redraws.clone();
    let _subscription = session.on_redraw(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    set_float(session.property("Radius").unwrap().as_ref(), 7.0);
    assert!(redraws.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_second_run_is_refused_while_running() {
    let session = session();
    assert_eq!(session.run(script("let x = 1;")), RunRequest::Started);
    assert_eq!(session.run(script("let y = 2;")), RunRequest::Refused);
    assert_eq!(session.state(), RunState::Running);

    let outcome = session.wait_for_completion(WAIT).unwrap();
    assert_eq!(outcome.state, RunState::Succeeded);
    assert_eq!(session.run(script("let y = 2;")), RunRequest::Started);
    session.wait_for_completion(WAIT).unwrap();
}

#[test]
fn test_failed_run_keeps_previous_program() {
    let session = session();
    run(&session, r#"ri.set_frame_callback(|ctx| { ctx.clear([1, 0, 0]); });"#);

    let outcome = run(&session, r#"ri.set_frame_callback(|ctx| { }); throw "broken";"#);
    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.diagnostic.unwrap().kind, ScriptDiagnosticKind::RuntimeError);

    match &render(&session)[..] {
        [FrameCommand::Clear { colour, .. }] => assert_eq!(colour.x, 1.0),
        other => panic!("unexpected commands {other:?}"),
    }
}

#[test]
fn test_shader_compile_error_fails_run() {
    let session = session();
    let outcome = run(&session, r#"ri.compile_shader_source("not wgsl", "vs", "vs_5_0");"#);
    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.diagnostic.unwrap().kind, ScriptDiagnosticKind::ShaderCompileError);
    assert!(session.active_program().is_none());
}

#[test]
fn test_oversized_resources_fail_the_run() {
    let session = session();
    for text in [
        r#"ri.create_texture_2d(65536, 65536, Format.R8_UNorm, ());"#,
        r#"ri.create_buffer(2000000000, Format.R32G32B32A32_Float, ());"#,
        r#"ri.create_render_target(#{ width: 100000, height: 4 });"#,
    ] {
        let outcome = run(&session, text);
        assert_eq!(outcome.state, RunState::Failed, "{text}");
    }
}

#[test]
fn test_missing_target_means_back_buffer() {
    let session = session();
    run(
        &session,
        r#"
        let vs = ri.compile_shader_source(SOURCE, "vs", "vs_5_0");
        ri.set_frame_callback(|ctx| {
            ctx.draw_sphere(vs, ());
            ctx.draw_sphere(vs, (), #{ targets: () });
            ctx.clear([0, 0, 0], ());
        });
        "#,
    );
    for command in render(&session) {
        let targets = match command {
            FrameCommand::Draw(draw) => draw.targets,
            FrameCommand::Clear { targets, .. } => targets,
            FrameCommand::Dispatch(_) => unreachable!(),
        };
        assert_eq!(targets, vec![TargetRef::BackBuffer]);
    }
}

#[test]
fn test_draw_override_wins_for_marked_variable() {
    let session = session();
    run(
        &session,
        r#"
        let vs = ri.compile_shader_source(SOURCE, "vs", "vs_5_0");
        let radius = vs.find_constant_variable("Radius");
        radius.set(2.0);
        radius.mark_as_script_override();
        ri.set_frame_callback(|ctx| {
            ctx.draw_sphere(vs, (), #{ overrides: #{ Radius: 9.0 } });
            ctx.draw_sphere(vs, ());
        });
        "#,
    );
    let commands = render(&session);
    assert_eq!(drawn_radius(&commands[0..1]), 9.0);
    assert_eq!(drawn_radius(&commands[1..2]), 2.0);
}

#[test]
fn test_override_ignored_for_unmarked_variable() {
    let session = session();
    run(
        &session,
        r#"
        let vs = ri.compile_shader_source(SOURCE, "vs", "vs_5_0");
        vs.find_constant_variable("Radius").set(2.0);
        ri.set_frame_callback(|ctx| {
            ctx.draw_sphere(vs, (), #{ overrides: #{ Radius: 9.0 } });
        });
        "#,
    );
    assert_eq!(drawn_radius(&render(&session)), 2.0);
}
