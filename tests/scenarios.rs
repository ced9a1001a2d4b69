use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use taffy_core::marshall::{marshall, unmarshall};
use taffy_core::{Node, NodeEvaluator, Runtime, RuntimeConfig};

fn runtime() -> Arc<Runtime> {
    Runtime::with_captured_output(RuntimeConfig::default()).expect("runtime")
}

fn shown(evaluator: &mut NodeEvaluator, node: &Node) -> String {
    evaluator.display_string(node).expect("displays")
}

fn run(evaluator: &mut NodeEvaluator, source: &str) -> String {
    let value = evaluator.evaluate_source(source, "scenario.ty").expect("evaluates");
    shown(evaluator, &value)
}

fn failure(evaluator: &mut NodeEvaluator, source: &str) -> String {
    evaluator
        .evaluate_source(source, "scenario.ty")
        .unwrap_err()
        .message
}

fn write_source(root: &Path, relative: &str, source: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create source dir");
    }
    fs::write(path, source).expect("write source");
}

#[test]
fn test_class_with_accessors_and_methods() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = r#"
class Counter {
    @count, @rw
    (@) init { @count = 0 }
    (@) bumpBy: step { @count = @count + step
        return self }
}
c = new Counter
[[c bumpBy: 2] bumpBy: 3]
[c setCount: [c count] * 10]
[c count]
"#;
    assert_eq!(run(&mut evaluator, source), "50");
}

#[test]
fn test_loops_and_break() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let total = "total = 0\nfor (i = 0; i < 5; i++) { total = total + i }\ntotal";
    assert_eq!(run(&mut evaluator, total), "10");

    let counted = "n = 0\nwhile yes {\n  n += 1\n  if n == 3 { break }\n}\nn";
    assert_eq!(run(&mut evaluator, counted), "3");

    let error = evaluator.evaluate_source("break", "scenario.ty").unwrap_err();
    assert!(error.message.contains("BreakWithoutALoopException"), "{}", error.message);
}

#[test]
fn test_final_super_class_refused() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = "final class Sealed { }\nclass Opened(Sealed) { }";
    let error = evaluator.evaluate_source(source, "scenario.ty").unwrap_err();
    assert!(error.message.contains("InvalidSuperClassException"), "{}", error.message);
    assert!(runtime.classes().class_in("", "Opened").is_none());
}

#[test]
fn test_inherited_accessor_on_subclass() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = "class A {\n  @x, @rw\n}\nclass B(A) { }\nb = new B\n[b setX: 5]\n[b x]";
    assert_eq!(run(&mut evaluator, source), "5");
}

#[test]
fn test_while_loop_counts_to_three() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    assert_eq!(run(&mut evaluator, "i = 0\nwhile i < 3 { i++ }\ni"), "3");
}

#[test]
fn test_final_super_named_without_package() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_source(dir.path(), "vault/Sealed.ty", "package vault\nfinal class Sealed { }\n");
    write_source(dir.path(), "main.ty", "import vault.Sealed\nclass Opened(Sealed) { }\n");

    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let error = evaluator
        .evaluate_file(&dir.path().join("main.ty"))
        .unwrap_err();
    assert!(
        error.message.starts_with("Uncaught Exception: InvalidSuperClassException: Sealed"),
        "{}",
        error.message
    );
    assert!(!error.message.contains("vault.Sealed"), "{}", error.message);
}

#[test]
fn test_unknown_super_class_at_top_level() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let message = failure(&mut evaluator, "class Orphan(Missing) { }\n[new Orphan className]");
    assert!(
        message.starts_with("Uncaught Exception: UnidentifiedClassException: Missing"),
        "{}",
        message
    );
}

#[test]
fn test_unknown_super_class_through_import() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_source(dir.path(), "lib/Broken.ty", "package lib\nclass Broken(Absent) { }\n");
    write_source(dir.path(), "main.ty", "import lib.Broken\n");

    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let error = evaluator
        .evaluate_file(&dir.path().join("main.ty"))
        .unwrap_err();
    assert!(error.message.contains("UnidentifiedClassException: Absent"), "{}", error.message);
}

#[test]
fn test_read_then_write_on_same_object_deadlocks() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = r#"
class Ledger {
    (@, @synchronizedRead) total { return [self adjust] }
    (@, @synchronizedWrite) adjust { return 1 }
}
[new Ledger total]
"#;
    let message = failure(&mut evaluator, source);
    assert!(message.contains("DeadlockException"), "{}", message);
}

#[test]
fn test_const_method_cannot_call_mutator() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = r#"
class Gauge {
    @level, @rw
    (@, @const) peek { return [self level] }
    (@, @const) nudge { return [self raise] }
    (@) raise { @level = 1 }
}
g = new Gauge
[g peek]
[g nudge]
"#;
    let message = failure(&mut evaluator, source);
    assert!(
        message.contains("NonConstantUseOfConstantException: Gauge"),
        "{}",
        message
    );
}

#[test]
fn test_reopening_with_other_flags_is_inconsistent() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let message = failure(&mut evaluator, "class Shape { }\nabstract class Shape { }");
    assert!(message.contains("InconsistentClassUpdateException"), "{}", message);
}

#[test]
fn test_local_cannot_become_global() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let message = failure(&mut evaluator, "x = 1\nglobal x = 2");
    assert!(message.contains("LocalToGlobalConversionException: x"), "{}", message);
}

#[test]
fn test_blocks_keep_their_iteration_binding() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = r#"
blocks = []
for (i = 0; i < 3; i++) {
    j = i
    [blocks add: ^{ j }]
}
[[[blocks objectAtIndex: 0] call], [[blocks objectAtIndex: 1] call], [[blocks objectAtIndex: 2] call]]
"#;
    assert_eq!(run(&mut evaluator, source), "[0, 1, 2]");
}

#[test]
fn test_block_return_leaves_enclosing_method() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = r#"
class Finder {
    (@) first: items {
        check = ^{ <item> if item > 2 { return item } }
        for (i = 0; i < [items size]; i++) {
            [check callWith: [[items objectAtIndex: i]]]
        }
        return nil
    }
}
[new Finder first: [1, 5, 7]]
"#;
    assert_eq!(run(&mut evaluator, source), "5");
}

#[test]
fn test_catch_by_ancestor_class() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = r#"
class ParseFailure(Exception) { }
class Router {
    (@) route { throw new ParseFailure }
}
try {
    [new Router route]
} catch (IndexOutOfBoundsException e) {
    [io putLine: "wrong handler"]
} catch (Exception e) {
    [io putLine: "caught"]
}
"#;
    evaluator.evaluate_source(source, "scenario.ty").expect("evaluates");
    assert_eq!(runtime.take_captured_output().as_deref(), Some("caught\n"));
}

#[test]
fn test_uncaught_user_exception_is_reported() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = "class Boom(Exception) { }\nthrow new Boom";
    let error = evaluator.evaluate_source(source, "scenario.ty").unwrap_err();
    assert!(error.message.starts_with("Uncaught Exception: "), "{}", error.message);
    assert!(error.message.contains("Boom"), "{}", error.message);
}

#[test]
fn test_marshall_instance_round_trip() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = r#"
class Point {
    @x, @rw
    @y, @rw
}
p = new Point
[p setX: 3]
[p setY: ["four", 4.5]]
p
"#;
    let point = evaluator.evaluate_source(source, "scenario.ty").expect("evaluates");
    let bytes = marshall(&point).expect("marshalls");
    let copy = unmarshall(&bytes, runtime.classes()).expect("unmarshalls");

    let x = evaluator.call_method(&copy, "x", &[]).expect("reads x");
    assert_eq!(shown(&mut evaluator, &x), "3");
    let y = evaluator.call_method(&copy, "y", &[]).expect("reads y");
    assert_eq!(shown(&mut evaluator, &y), "[four, 4.5]");
}

#[test]
fn test_marshall_hash_and_list_round_trip() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let hash = evaluator
        .evaluate_source("(\"a\" => 1, #b => [2, \"three\"])", "scenario.ty")
        .expect("evaluates");
    let list = evaluator
        .evaluate_source("l = new List\n[l add: 1.5]\n[l add: \"x\"]\nl", "scenario.ty")
        .expect("evaluates");

    for original in [hash, list] {
        let bytes = marshall(&original).expect("marshalls");
        let copy = unmarshall(&bytes, runtime.classes()).expect("unmarshalls");
        assert!(!copy.is_same(&original));
        assert_eq!(shown(&mut evaluator, &copy), shown(&mut evaluator, &original));
    }
}

#[test]
fn test_marshall_keeps_singleton_identity() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let source = "singleton class Registry { @entries, @rw }\n[Registry instance]";
    let instance = evaluator.evaluate_source(source, "scenario.ty").expect("evaluates");
    let bytes = marshall(&instance).expect("marshalls");
    let copy = unmarshall(&bytes, runtime.classes()).expect("unmarshalls");
    assert!(copy.is_same(&instance));
}

#[test]
fn test_import_resolves_super_declared_later_in_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_source(
        dir.path(),
        "shapes/Square.ty",
        "package shapes\nclass Square(Shape) {\n  (@) sides { return 4 }\n}\nclass Shape {\n  (@) kind { return \"shape\" }\n}\n",
    );
    write_source(
        dir.path(),
        "main.ty",
        "import shapes.Square\ns = new Square\n[io putLine: [s kind]]\n[io putLine: [s sides]]\n",
    );

    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    evaluator
        .evaluate_file(&dir.path().join("main.ty"))
        .expect("evaluates");
    assert_eq!(runtime.take_captured_output().as_deref(), Some("shape\n4\n"));
}

#[test]
fn test_mutual_imports_are_deferred() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_source(
        dir.path(),
        "zoo/Keeper.ty",
        "package zoo\nimport zoo.Animal\nclass Keeper {\n  (@) adopt { return new Animal }\n}\n",
    );
    write_source(
        dir.path(),
        "zoo/Animal.ty",
        "package zoo\nimport zoo.Keeper\nclass Animal(Keeper) {\n  (@) sound { return #roar }\n}\n",
    );
    write_source(
        dir.path(),
        "main.ty",
        "import zoo.Keeper\nk = new Keeper\na = [k adopt]\n[io putLine: [a sound]]\n[io putLine: [[a adopt] sound]]\n",
    );

    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    evaluator
        .evaluate_file(&dir.path().join("main.ty"))
        .expect("evaluates");
    assert_eq!(runtime.take_captured_output().as_deref(), Some("#roar\n#roar\n"));
    assert!(runtime.classes().class_in("zoo", "Animal").is_some());
}

#[test]
fn test_import_ignores_same_named_root_class() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_source(
        dir.path(),
        "tools/Hammer.ty",
        "package tools\nclass Hammer {\n  (@) kind { return \"packaged\" }\n}\n",
    );
    write_source(
        dir.path(),
        "main.ty",
        "class Hammer {\n  (@) kind { return \"root\" }\n}\nimport tools.Hammer\n",
    );

    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    evaluator
        .evaluate_file(&dir.path().join("main.ty"))
        .expect("evaluates");
    let packaged = runtime.classes().class_in("tools", "Hammer").expect("imported from file");
    assert_eq!(packaged.template().full_name(), "tools.Hammer");
    assert!(runtime.classes().class_in("", "Hammer").is_some());
}

#[test]
fn test_missing_import_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_source(dir.path(), "main.ty", "import nowhere.Thing\n");

    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    let error = evaluator
        .evaluate_file(&dir.path().join("main.ty"))
        .unwrap_err();
    assert!(error.message.contains("ImportFailedException"), "{}", error.message);
}

#[test]
fn test_concurrent_registration_keeps_one_class() {
    let runtime = runtime();
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let runtime = runtime.clone();
            thread::spawn(move || {
                let mut evaluator = runtime.create_evaluator();
                let source = "class Shared {\n  @value, @rw\n}\ns = new Shared\n[s setValue: 1]\n[s value]";
                let value = evaluator
                    .evaluate_source(source, &format!("worker{}.ty", i))
                    .expect("evaluates");
                evaluator.display_string(&value).expect("displays")
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().expect("worker finished"), "1");
    }
    let shared = runtime
        .classes()
        .templates()
        .into_iter()
        .filter(|template| &*template.name == "Shared")
        .count();
    assert_eq!(shared, 1);
}

#[test]
fn test_concurrent_registration_assigns_distinct_ids() {
    let runtime = runtime();
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let runtime = runtime.clone();
            thread::spawn(move || {
                let mut evaluator = runtime.create_evaluator();
                let source = format!("class Worker{} {{ }}", i);
                evaluator
                    .evaluate_source(&source, &format!("worker{}.ty", i))
                    .expect("evaluates");
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker finished");
    }

    let mut ids: Vec<u32> = runtime
        .classes()
        .templates()
        .into_iter()
        .filter(|template| template.name.starts_with("Worker"))
        .map(|template| template.marshall_id())
        .collect();
    assert_eq!(ids.len(), 4);
    assert!(ids.iter().all(|&id| id != 0));
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[test]
fn test_collection_reclaims_unreachable_cycle() {
    let runtime = runtime();
    let mut evaluator = runtime.create_evaluator();
    evaluator
        .evaluate_source("class Link {\n  @next, @rw\n}", "links.ty")
        .expect("evaluates");
    runtime.gc().collect();
    let baseline = runtime.gc().stats().tracked_count;

    let source = "a = new Link\nb = new Link\n[a setNext: b]\n[b setNext: a]\na = nil\nb = nil";
    evaluator.evaluate_source(source, "links.ty").expect("evaluates");
    runtime.gc().collect();
    assert!(runtime.gc().stats().tracked_count <= baseline);
}

#[test]
fn test_abort_from_another_thread() {
    let runtime = runtime();
    let looping = runtime.clone();
    let worker = thread::spawn(move || {
        let mut evaluator = looping.create_evaluator();
        evaluator.evaluate_source("n = 0\nwhile yes { n += 1 }", "spin.ty")
    });

    while !worker.is_finished() {
        runtime.abort_all();
        thread::sleep(Duration::from_millis(20));
    }
    let error = worker.join().expect("worker finished").unwrap_err();
    assert!(error.message.starts_with("Execution aborted"), "{}", error.message);
}
