use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::Utf8Path;

use crate::builder::{CommandOptions, CommandPriority, FileOptions};
use crate::error::ExecuteError;
use crate::phase::Phase;
use crate::provider::{ProviderType, Providers};
use crate::task::{TaskDefinition, TaskRun};
use crate::tree::{GeneratorNode, GeneratorTree};

use super::{ExecuteOptions, execute};

fn run(root: GeneratorNode) -> Result<crate::ExecutionResult, ExecuteError> {
    let tree = GeneratorTree::new(root).unwrap();
    execute(&tree, &ExecuteOptions::default())
}

fn commands(result: &crate::ExecutionResult) -> Vec<&str> {
    result
        .post_write_commands
        .iter()
        .map(|command| command.command.as_str())
        .collect()
}

fn command_task(name: &'static str, command: &'static str) -> TaskDefinition {
    TaskDefinition::builder(name).run(move |_, _| {
        Ok(TaskRun::new().build(move |builder| {
            builder.add_post_write_command(command, CommandOptions::default());
            Ok(Providers::new())
        }))
    })
}

struct Simple {
    calls: AtomicUsize,
}

impl Simple {
    fn method(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_simple_generator() {
    let root = GeneratorNode::new("root", "test-generator").task(
        TaskDefinition::builder("simple").run(|_, _| {
            Ok(TaskRun::new().build(|builder| {
                builder.write_file("simple", "/simple/file.txt", "simple", FileOptions::default());
                builder.add_post_write_command("simple command", CommandOptions::default());
                Ok(Providers::new())
            }))
        }),
    );

    let result = run(root).unwrap();

    let file = &result.files[Utf8Path::new("/simple/file.txt")];
    assert_eq!(file.id, "test-generator:simple");
    assert_eq!(file.contents, "simple");
    assert_eq!(commands(&result), ["simple command"]);
    assert_eq!(
        result.post_write_commands[0].options.priority,
        CommandPriority::Default
    );
}

#[test]
fn test_nested_provider_is_shared() {
    let simple = ProviderType::<Simple>::new("simple");
    let shared = Arc::new(Simple {
        calls: AtomicUsize::new(0),
    });
    let seen = Arc::new(Mutex::new(None::<Arc<Simple>>));

    let root = GeneratorNode::new("root", "test-generator")
        .task({
            let shared = shared.clone();
            TaskDefinition::builder("provide")
                .exports("simple", &simple)
                .run(move |_, _| {
                    Ok(TaskRun::new()
                        .provide_arc("simple", shared.clone())
                        .build(|builder| {
                            builder.write_file("simple", "/simple/file.txt", "simple", FileOptions::default());
                            Ok(Providers::new())
                        }))
                })
        })
        .child(
            GeneratorNode::new("root:nested", "nested").task({
                let seen = seen.clone();
                TaskDefinition::builder("consume")
                    .depends_on("simple", &simple)
                    .run(move |_, deps| {
                        let simple = deps.get::<Simple>("simple")?;
                        simple.method();
                        *seen.lock().unwrap() = Some(simple);
                        Ok(TaskRun::new().build(|builder| {
                            builder.write_file("nested", "/nested/file.txt", "nested", FileOptions::default());
                            Ok(Providers::new())
                        }))
                    })
            }),
        );

    let result = run(root).unwrap();

    let seen = seen.lock().unwrap().clone().unwrap();
    assert!(Arc::ptr_eq(&seen, &shared));
    assert_eq!(shared.calls.load(Ordering::SeqCst), 1);

    assert_eq!(result.files[Utf8Path::new("/simple/file.txt")].id, "test-generator:simple");
    assert_eq!(result.files[Utf8Path::new("/nested/file.txt")].id, "nested:nested");
}

#[test]
fn test_unresolved_dependency() {
    let missing = ProviderType::<String>::new("missing");
    let root = GeneratorNode::new("root", "root").child(
        GeneratorNode::new("root:child", "child").task(
            TaskDefinition::builder("needs")
                .depends_on("missing", &missing)
                .run(|_, _| Ok(TaskRun::new())),
        ),
    );

    let err = run(root).unwrap_err();
    assert!(matches!(
        &err,
        ExecuteError::UnresolvedDependency { dependency, task_id, path }
            if dependency == "missing" && task_id == "root:child#needs" && path == "root > root:child"
    ));
}

#[test]
fn test_sibling_exports_are_not_visible() {
    let value = ProviderType::<u32>::new("value");
    let root = GeneratorNode::new("root", "root")
        .child(
            GeneratorNode::new("root:a", "a").task(
                TaskDefinition::builder("provide")
                    .exports("value", &value)
                    .run(|_, _| Ok(TaskRun::new().provide("value", 1u32))),
            ),
        )
        .child(
            GeneratorNode::new("root:b", "b").task(
                TaskDefinition::builder("consume")
                    .depends_on("value", &value)
                    .run(|_, _| Ok(TaskRun::new())),
            ),
        );

    assert!(matches!(
        run(root),
        Err(ExecuteError::UnresolvedDependency { .. })
    ));
}

#[test]
fn test_closest_ancestor_wins() {
    let name = ProviderType::<&'static str>::new("name");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let consumer = |seen: Arc<Mutex<Vec<&'static str>>>| {
        TaskDefinition::builder("consume")
            .depends_on("name", &name)
            .run(move |_, deps| {
                seen.lock().unwrap().push(*deps.get::<&'static str>("name")?);
                Ok(TaskRun::new())
            })
    };

    let provider = |value: &'static str| {
        TaskDefinition::builder("provide")
            .exports("name", &name)
            .run(move |_, _| Ok(TaskRun::new().provide("name", value)))
    };

    let root = GeneratorNode::new("root", "root").task(provider("outer")).child(
        GeneratorNode::new("root:inner", "inner")
            .task(provider("inner"))
            .child(GeneratorNode::new("root:inner:leaf", "leaf").task(consumer(seen.clone()))),
    );

    run(root).unwrap();
    assert_eq!(*seen.lock().unwrap(), ["inner"]);
}

#[test]
fn test_project_scope_reaches_whole_tree() {
    let registry = ProviderType::<String>::new("registry").project_scoped();
    let seen = Arc::new(Mutex::new(None));

    let root = GeneratorNode::new("root", "root")
        .child(
            GeneratorNode::new("root:consumer", "consumer").task({
                let seen = seen.clone();
                TaskDefinition::builder("consume")
                    .depends_on("registry", &registry)
                    .run(move |_, deps| {
                        *seen.lock().unwrap() = Some(deps.get::<String>("registry")?);
                        Ok(TaskRun::new())
                    })
            }),
        )
        .child(
            GeneratorNode::new("root:provider", "provider").task(
                TaskDefinition::builder("provide")
                    .exports("registry", &registry)
                    .run(|_, _| Ok(TaskRun::new().provide("registry", "shared".to_string()))),
            ),
        );

    run(root).unwrap();
    assert_eq!(seen.lock().unwrap().as_deref().map(String::as_str), Some("shared"));
}

#[test]
fn test_optional_dependency() {
    let missing = ProviderType::<String>::new("missing");
    let seen = Arc::new(AtomicUsize::new(0));

    let root = GeneratorNode::new("root", "root").task({
        let seen = seen.clone();
        TaskDefinition::builder("maybe")
            .depends_on("missing", missing.dependency().optional())
            .run(move |_, deps| {
                assert!(deps.get_optional::<String>("missing")?.is_none());
                assert!(!deps.contains("missing"));
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(TaskRun::new())
            })
    });

    run(root).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_provider_conflict() {
    let value = ProviderType::<u32>::new("value");
    let provider = |name: &'static str| {
        TaskDefinition::builder(name)
            .exports("value", &value)
            .run(|_, _| Ok(TaskRun::new().provide("value", 1u32)))
    };

    let root = GeneratorNode::new("root", "root")
        .task(provider("first"))
        .task(provider("second"));

    let err = run(root).unwrap_err();
    assert!(matches!(
        err,
        ExecuteError::ProviderConflict { provider, first, second }
            if provider == "value" && first == "root#first" && second == "root#second"
    ));
}

#[test]
fn test_undeclared_export() {
    let root = GeneratorNode::new("root", "root").task(
        TaskDefinition::builder("sneaky").run(|_, _| Ok(TaskRun::new().provide("extra", 1u32))),
    );

    let err = run(root).unwrap_err();
    assert!(matches!(err, ExecuteError::Provider { task_id, .. } if task_id == "root#sneaky"));
}

#[test]
fn test_exports_do_not_cross_phases() {
    let context = ProviderType::<String>::new("context");
    let later = Phase::new("later");

    let root = GeneratorNode::new("root", "root")
        .task(
            TaskDefinition::builder("provide")
                .exports("context", &context)
                .run(|_, _| Ok(TaskRun::new().provide("context", "x".to_string()))),
        )
        .task(
            TaskDefinition::builder("consume")
                .phase(&later)
                .depends_on("context", &context)
                .run(|_, _| Ok(TaskRun::new())),
        );

    let err = run(root).unwrap_err();
    assert!(matches!(
        &err,
        ExecuteError::PhaseVisibilityViolation { dependency, task_id, .. }
            if dependency == "context" && task_id == "root#consume"
    ));
    assert!(err.to_string().contains("cannot come from a previous phase"));
}

#[test]
fn test_outputs_cross_phases() {
    let manifest = ProviderType::<Vec<String>>::new("manifest").read_only();
    let later = Phase::new("later");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let root = GeneratorNode::new("root", "root")
        .task(
            TaskDefinition::builder("collect")
                .outputs("manifest", &manifest)
                .run(|_, _| {
                    Ok(TaskRun::new().build(|_| {
                        Ok(Providers::new().with("manifest", vec!["a".to_string()]))
                    }))
                }),
        )
        .child(
            GeneratorNode::new("root:child", "child").task({
                let seen = seen.clone();
                TaskDefinition::builder("read")
                    .phase(&later)
                    .depends_on("manifest", &manifest)
                    .run(move |_, deps| {
                        seen.lock()
                            .unwrap()
                            .extend(deps.get::<Vec<String>>("manifest")?.iter().cloned());
                        Ok(TaskRun::new())
                    })
            }),
        );

    run(root).unwrap();
    assert_eq!(*seen.lock().unwrap(), ["a"]);
}

#[test]
fn test_commands_are_post_ordered() {
    let root = GeneratorNode::new("root", "root")
        .task(command_task("main", "R"))
        .child(GeneratorNode::new("root:c1", "c1").task(command_task("main", "C1")))
        .child(GeneratorNode::new("root:c2", "c2").task(command_task("main", "C2")));

    let result = run(root).unwrap();
    assert_eq!(commands(&result), ["C1", "C2", "R"]);
}

#[test]
fn test_commands_follow_declaration_within_node() {
    let root = GeneratorNode::new("root", "root")
        .task(command_task("b", "first"))
        .task(command_task("a", "second"))
        .child(
            GeneratorNode::new("root:app", "app")
                .child(GeneratorNode::new("root:app:db", "db").task(command_task("main", "db")))
                .task(command_task("main", "app")),
        );

    let result = run(root).unwrap();
    assert_eq!(commands(&result), ["db", "app", "first", "second"]);
}

#[test]
fn test_sequential_matches_parallel() {
    let build = || {
        let mut root = GeneratorNode::new("root", "root").task(command_task("main", "root"));
        for i in 0..8 {
            let mut child = GeneratorNode::new(format!("root:{i}"), "pkg");
            for j in 0..3 {
                child = child.child(
                    GeneratorNode::new(format!("root:{i}:{j}"), "leaf").task(
                        TaskDefinition::builder("main").run(move |_, _| {
                            Ok(TaskRun::new().build(move |builder| {
                                builder.write_file(
                                    "leaf",
                                    format!("/out/{i}/{j}.txt"),
                                    format!("{i}-{j}"),
                                    FileOptions::default(),
                                );
                                builder.add_post_write_command(
                                    format!("leaf {i} {j}"),
                                    CommandOptions::default(),
                                );
                                Ok(Providers::new())
                            }))
                        }),
                    ),
                );
            }
            root = root.child(child.task(command_task("main", "pkg")));
        }
        GeneratorTree::new(root).unwrap()
    };

    let parallel = execute(&build(), &ExecuteOptions::default()).unwrap();
    let sequential = execute(&build(), &ExecuteOptions {
            parallel: false,
            ..ExecuteOptions::default()
        }).unwrap();

    assert_eq!(parallel.files.len(), 24);
    assert_eq!(commands(&parallel), commands(&sequential));
    assert_eq!(parallel.fingerprint(), sequential.fingerprint());
    assert_eq!(commands(&parallel).last(), Some(&"root"));
}

#[test]
fn test_output_conflict() {
    let writer = |name: &'static str| {
        TaskDefinition::builder(name).run(|_, _| {
            Ok(TaskRun::new().build(|builder| {
                builder.write_file("same", "/same.txt", "x", FileOptions::default());
                Ok(Providers::new())
            }))
        })
    };

    let root = GeneratorNode::new("root", "root")
        .task(writer("a"))
        .child(GeneratorNode::new("root:child", "child").task(writer("b")));

    let err = run(root).unwrap_err();
    assert!(matches!(
        err,
        ExecuteError::OutputConflict { destination, first, second }
            if destination == "/same.txt" && first == "child:same" && second == "root:same"
    ));
}

#[test]
fn test_phase_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let record = |name: &'static str, phase: Option<&Phase>| {
        let log = log.clone();
        let builder = TaskDefinition::builder(name);
        let builder = match phase {
            Some(phase) => builder.phase(phase),
            None => builder,
        };
        builder.run(move |ctx, _| {
            log.lock()
                .unwrap()
                .push(format!("{}@{}", ctx.task_id, ctx.phase.unwrap_or("default")));
            Ok(TaskRun::new())
        })
    };

    let generate = Phase::new("generate");
    let format = Phase::consuming("format", [&generate]);

    let root = GeneratorNode::new("root", "root")
        .task(record("fmt", Some(&format)))
        .task(record("gen", Some(&generate)))
        .task(record("init", None));

    let result = run(root).unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        ["root#init@default", "root#gen@generate", "root#fmt@format"]
    );
    let phases: Vec<_> = result
        .diagnostics
        .phases
        .iter()
        .map(|phase| phase.name.as_str())
        .collect();
    assert_eq!(phases, ["default", "generate", "format"]);
}

#[test]
fn test_dynamic_task_runs_in_later_phase() {
    let install = Phase::new("install");

    let root = GeneratorNode::new("root", "root")
        .task({
            let install = install.clone();
            TaskDefinition::builder("plan").run(move |_, _| {
                let install = install.clone();
                Ok(TaskRun::new().build(move |builder| {
                    builder.add_dynamic_task(
                        "install-deps",
                        TaskDefinition::builder("ignored")
                            .phase(&install)
                            .run(|_, _| {
                                Ok(TaskRun::new().build(|builder| {
                                    builder.add_post_write_command(
                                        "pnpm install",
                                        CommandOptions::with_priority(CommandPriority::Dependencies),
                                    );
                                    Ok(Providers::new())
                                }))
                            }),
                    );
                    builder.add_post_write_command("planned", CommandOptions::default());
                    Ok(Providers::new())
                }))
            })
        });

    let result = run(root).unwrap();

    assert_eq!(commands(&result), ["planned", "pnpm install"]);
    assert!(result.diagnostics.execution_times.contains_key("root#install-deps"));
}

#[test]
fn test_dynamic_task_without_phase() {
    let root = GeneratorNode::new("root", "root").task(TaskDefinition::builder("plan").run(|_, _| {
        Ok(TaskRun::new().build(|builder| {
            builder.add_dynamic_task(
                "x",
                TaskDefinition::builder("x").run(|_, _| Ok(TaskRun::new())),
            );
            Ok(Providers::new())
        }))
    }));

    let err = run(root).unwrap_err();
    assert!(matches!(&err, ExecuteError::DynamicTaskMissingPhase { name, .. } if name == "x"));
    assert!(err.to_string().contains("'x'"));
}

#[test]
fn test_duplicate_dynamic_task() {
    let later = Phase::new("later");

    let root = GeneratorNode::new("root", "root").task(TaskDefinition::builder("plan").run(move |_, _| {
        let later = later.clone();
        Ok(TaskRun::new().build(move |builder| {
            for _ in 0..2 {
                builder.add_dynamic_task(
                    "x",
                    TaskDefinition::builder("x")
                        .phase(&later)
                        .run(|_, _| Ok(TaskRun::new())),
                );
            }
            Ok(Providers::new())
        }))
    }));

    let err = run(root).unwrap_err();
    assert!(matches!(
        &err,
        ExecuteError::DuplicateDynamicTask { name, node_id, .. } if name == "x" && node_id == "root"
    ));
    assert!(err.to_string().contains("'x'"));
}

#[test]
fn test_dynamic_task_into_started_phase() {
    let generate = Phase::new("generate");

    let root = GeneratorNode::new("root", "root").task({
        let generate = generate.clone();
        TaskDefinition::builder("plan")
            .phase(&generate)
            .run(move |_, _| {
                let generate = generate.clone();
                Ok(TaskRun::new().build(move |builder| {
                    builder.add_dynamic_task(
                        "again",
                        TaskDefinition::builder("again")
                            .phase(&generate)
                            .run(|_, _| Ok(TaskRun::new())),
                    );
                    Ok(Providers::new())
                }))
            })
    });

    let err = run(root).unwrap_err();
    assert!(matches!(
        err,
        ExecuteError::DynamicTaskPhaseStarted { name, phase, .. } if name == "again" && phase == "generate"
    ));
}

#[test]
fn test_task_error_aborts_run() {
    let root = GeneratorNode::new("root", "root")
        .task(command_task("ok", "never returned"))
        .child(
            GeneratorNode::new("root:broken", "broken").task(
                TaskDefinition::builder("fail")
                    .run(|_, _| Err(anyhow::anyhow!("config file is missing"))),
            ),
        );

    let err = run(root).unwrap_err();
    assert!(matches!(&err, ExecuteError::Task { task_id, .. } if task_id == "root:broken#fail"));
    assert!(err.to_string().contains("config file is missing"));
}

#[test]
fn test_build_panic_is_reported() {
    let root = GeneratorNode::new("root", "root").task(TaskDefinition::builder("boom").run(|_, _| {
        Ok(TaskRun::new().build(|_| -> anyhow::Result<Providers> { panic!("kaboom") }))
    }));

    let err = run(root).unwrap_err();
    assert!(matches!(&err, ExecuteError::Task { task_id, .. } if task_id == "root#boom"));
    assert!(err.to_string().contains("kaboom"));
}

#[test]
fn test_provider_runs_before_consumer_declared_earlier() {
    let value = ProviderType::<u32>::new("value").project_scoped();
    let seen = Arc::new(AtomicUsize::new(0));

    let root = GeneratorNode::new("root", "root")
        .task({
            let seen = seen.clone();
            TaskDefinition::builder("consume")
                .depends_on("value", &value)
                .run(move |_, deps| {
                    seen.store(*deps.get::<u32>("value")? as usize, Ordering::SeqCst);
                    Ok(TaskRun::new())
                })
        })
        .child(
            GeneratorNode::new("root:late", "late").task(
                TaskDefinition::builder("provide")
                    .exports("value", &value)
                    .run(|_, _| Ok(TaskRun::new().provide("value", 7u32))),
            ),
        );

    run(root).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 7);
}

#[test]
fn test_dependency_cycle() {
    let a = ProviderType::<u32>::new("a").project_scoped();
    let b = ProviderType::<u32>::new("b").project_scoped();

    let root = GeneratorNode::new("root", "root")
        .task(
            TaskDefinition::builder("one")
                .depends_on("b", &b)
                .exports("a", &a)
                .run(|_, _| Ok(TaskRun::new().provide("a", 1u32))),
        )
        .task(
            TaskDefinition::builder("two")
                .depends_on("a", &a)
                .exports("b", &b)
                .run(|_, _| Ok(TaskRun::new().provide("b", 2u32))),
        );

    assert!(matches!(
        run(root),
        Err(ExecuteError::DependencyCycle { phase, .. }) if phase == "default"
    ));
}

#[test]
fn test_relative_destinations_use_base_directory() {
    let root = GeneratorNode::new("root", "project")
        .base_directory("/project")
        .child(
            GeneratorNode::new("root:backend", "backend")
                .base_directory("apps/backend")
                .task(TaskDefinition::builder("main").run(|_, _| {
                    Ok(TaskRun::new().build(|builder| {
                        builder.write_file("index", "src/index.ts", "export {}", FileOptions::default());
                        Ok(Providers::new())
                    }))
                })),
        );

    let result = run(root).unwrap();
    assert_eq!(
        result.files[Utf8Path::new("/project/apps/backend/src/index.ts")].id,
        "backend:index"
    );
}

#[test]
fn test_read_only_type_crosses_phases_only_as_output() {
    let config = ProviderType::<u32>::new("config").read_only();
    let later = Phase::new("later");

    let reader = |seen: Arc<Mutex<Option<u32>>>| {
        TaskDefinition::builder("read")
            .phase(&later)
            .depends_on("config", &config)
            .run(move |_, deps| {
                *seen.lock().unwrap() = Some(*deps.get::<u32>("config")?);
                Ok(TaskRun::new())
            })
    };

    let exported = GeneratorNode::new("root", "root")
        .task(
            TaskDefinition::builder("provide")
                .exports("config", &config)
                .run(|_, _| Ok(TaskRun::new().provide("config", 5u32))),
        )
        .task(reader(Arc::new(Mutex::new(None))));

    let err = run(exported).unwrap_err();
    assert!(matches!(
        &err,
        ExecuteError::PhaseVisibilityViolation { dependency, task_id, .. }
            if dependency == "config" && task_id == "root#read"
    ));

    let seen = Arc::new(Mutex::new(None));
    let output = GeneratorNode::new("root", "root")
        .task(
            TaskDefinition::builder("provide")
                .outputs("config", &config)
                .run(|_, _| {
                    Ok(TaskRun::new().build(|_| Ok(Providers::new().with("config", 5u32))))
                }),
        )
        .task(reader(seen.clone()));

    run(output).unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(5));
}

fn report_task(manifest: &ProviderType<u32>, label: &ProviderType<String>, phase: &Phase) -> TaskDefinition {
    TaskDefinition::builder("report")
        .phase(phase)
        .depends_on("manifest", manifest)
        .depends_on("label", label)
        .run(|_, deps| {
            let command = format!(
                "{} {}",
                deps.get::<String>("label")?,
                deps.get::<u32>("manifest")?
            );
            Ok(TaskRun::new().build(move |builder| {
                builder.add_post_write_command(command, CommandOptions::default());
                Ok(Providers::new())
            }))
        })
}

#[test]
fn test_dynamic_task_resolves_dependencies() {
    let manifest = ProviderType::<u32>::new("manifest").read_only();
    let label = ProviderType::<String>::new("label");
    let later = Phase::new("later");

    let root = GeneratorNode::new("root", "root")
        .task({
            let (manifest, label, later) = (manifest.clone(), label.clone(), later.clone());
            TaskDefinition::builder("plan")
                .outputs("manifest", &manifest)
                .run(move |_, _| {
                    let (manifest, label, later) = (manifest.clone(), label.clone(), later.clone());
                    Ok(TaskRun::new().build(move |builder| {
                        // Reads the output returned below.
                        builder.add_dynamic_task("report", report_task(&manifest, &label, &later));
                        builder.add_post_write_command("planned", CommandOptions::default());
                        Ok(Providers::new().with("manifest", 9u32))
                    }))
                })
        })
        .task(
            TaskDefinition::builder("label")
                .phase(&later)
                .exports("label", &label)
                .run(|_, _| Ok(TaskRun::new().provide("label", "docs".to_string()))),
        );

    let result = run(root).unwrap();
    assert_eq!(commands(&result), ["planned", "docs 9"]);
    assert!(result.diagnostics.execution_times.contains_key("root#report"));
}

#[test]
fn test_dynamic_phase_waits_for_consumed_static_phase() {
    let generate = Phase::new("generate");
    let summarize = Phase::consuming("summarize", [&generate]);

    let root = GeneratorNode::new("root", "root")
        .task({
            let summarize = summarize.clone();
            TaskDefinition::builder("plan").run(move |_, _| {
                let summarize = summarize.clone();
                Ok(TaskRun::new().build(move |builder| {
                    builder.add_dynamic_task(
                        "summary",
                        TaskDefinition::builder("summary")
                            .phase(&summarize)
                            .run(|_, _| {
                                Ok(TaskRun::new().build(|builder| {
                                    builder.add_post_write_command("summary", CommandOptions::default());
                                    Ok(Providers::new())
                                }))
                            }),
                    );
                    Ok(Providers::new())
                }))
            })
        })
        .child(GeneratorNode::new("root:gen", "gen").task({
            let generate = generate.clone();
            TaskDefinition::builder("gen").phase(&generate).run(|_, _| {
                Ok(TaskRun::new().build(|builder| {
                    builder.add_post_write_command("gen", CommandOptions::default());
                    Ok(Providers::new())
                }))
            })
        }));

    let result = run(root).unwrap();

    assert_eq!(commands(&result), ["gen", "summary"]);
    let phases: Vec<_> = result
        .diagnostics
        .phases
        .iter()
        .map(|phase| phase.name.as_str())
        .collect();
    assert_eq!(phases, ["default", "generate", "summarize"]);
}

#[test]
fn test_dynamic_task_cannot_shadow_static_task() {
    let later = Phase::new("later");

    let root = GeneratorNode::new("root", "root")
        .task(TaskDefinition::builder("plan").run(move |_, _| {
            let later = later.clone();
            Ok(TaskRun::new().build(move |builder| {
                builder.add_dynamic_task(
                    "install",
                    TaskDefinition::builder("install")
                        .phase(&later)
                        .run(|_, _| Ok(TaskRun::new())),
                );
                Ok(Providers::new())
            }))
        }))
        .task(command_task("install", "pnpm install"));

    let err = run(root).unwrap_err();
    assert!(matches!(
        &err,
        ExecuteError::DuplicateDynamicTask { name, node_id, task_id }
            if name == "install" && node_id == "root" && task_id == "root#plan"
    ));
}

fn publish_task(name: &'static str, registry: &ProviderType<String>, phase: Option<&Phase>) -> TaskDefinition {
    let builder = TaskDefinition::builder(name).outputs("registry", registry);
    let builder = match phase {
        Some(phase) => builder.phase(phase),
        None => builder,
    };
    builder.run(move |_, _| {
        Ok(TaskRun::new().build(move |_| Ok(Providers::new().with("registry", name.to_string()))))
    })
}

#[test]
fn test_project_output_reaches_other_subtrees() {
    let registry = ProviderType::<String>::new("registry")
        .project_scoped()
        .read_only();
    let later = Phase::new("later");
    let seen = Arc::new(Mutex::new(None));

    let root = GeneratorNode::new("root", "root")
        .child(GeneratorNode::new("root:a", "a").task(publish_task("publish", &registry, None)))
        .child(
            GeneratorNode::new("root:b", "b").task({
                let seen = seen.clone();
                TaskDefinition::builder("read")
                    .phase(&later)
                    .depends_on("registry", &registry)
                    .run(move |_, deps| {
                        *seen.lock().unwrap() = Some(deps.get::<String>("registry")?);
                        Ok(TaskRun::new())
                    })
            }),
        );

    run(root).unwrap();
    assert_eq!(seen.lock().unwrap().as_deref().map(String::as_str), Some("publish"));
}

#[test]
fn test_project_output_conflict_across_phases() {
    let registry = ProviderType::<String>::new("registry")
        .project_scoped()
        .read_only();
    let later = Phase::new("later");

    let root = GeneratorNode::new("root", "root")
        .child(GeneratorNode::new("root:a", "a").task(publish_task("publish", &registry, None)))
        .child(
            GeneratorNode::new("root:b", "b")
                .task(publish_task("republish", &registry, Some(&later))),
        );

    let err = run(root).unwrap_err();
    assert!(matches!(
        err,
        ExecuteError::ProviderConflict { provider, first, second }
            if provider == "registry" && first == "root:a#publish" && second == "root:b#republish"
    ));
}

#[test]
fn test_runs_under_parent_span() {
    use tracing_subscriber::registry::LookupSpan;

    let chain = Arc::new(Mutex::new(Vec::new()));

    let root = GeneratorNode::new("root", "root").task({
        let chain = chain.clone();
        TaskDefinition::builder("trace").run(move |ctx, _| {
            let id = ctx.span.id().unwrap();
            let names: Vec<&'static str> = tracing::dispatcher::get_default(|dispatch| {
                let registry = dispatch
                    .downcast_ref::<tracing_subscriber::Registry>()
                    .unwrap();
                registry
                    .span(&id)
                    .unwrap()
                    .scope()
                    .map(|span| span.name())
                    .collect()
            });
            *chain.lock().unwrap() = names;
            Ok(TaskRun::new())
        })
    });
    let tree = GeneratorTree::new(root).unwrap();

    tracing::subscriber::with_default(tracing_subscriber::registry(), || {
        let caller = tracing::info_span!("caller");
        let options = ExecuteOptions {
            parent: Some(caller),
            ..ExecuteOptions::default()
        };
        execute(&tree, &options).unwrap();
    });

    assert_eq!(*chain.lock().unwrap(), ["task", "phase", "execute", "caller"]);
}
