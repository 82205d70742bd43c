//! Spawns the built `qatam-byte` binary against the six end-to-end
//! input/stdout scenarios and asserts on captured stdout. Each script is
//! written to a scratch file and run in file mode so output contains
//! nothing but what the program itself printed.

use std::io::Write;
use std::process::Command;

fn run_script(name: &str, source: &str) -> String {
    let mut path = std::env::temp_dir();
    path.push(format!("qatam-byte-e2e-{name}.qtm"));
    let mut file = std::fs::File::create(&path).expect("create scratch script");
    file.write_all(source.as_bytes()).expect("write scratch script");
    drop(file);

    let output = Command::new(env!("CARGO_BIN_EXE_qatam-byte"))
        .arg(&path)
        .output()
        .expect("run qatam-byte");

    std::fs::remove_file(&path).ok();
    String::from_utf8(output.stdout).expect("stdout is valid utf-8")
}

#[test]
fn arithmetic_precedence() {
    assert_eq!(run_script("arithmetic", "print 1+2*3;"), "7\n");
}

#[test]
fn block_scoping_shadows_then_restores() {
    assert_eq!(
        run_script("scoping", "var a=1; var b=2; { var a=3; print a+b; } print a;"),
        "5\n1\n"
    );
}

#[test]
fn function_call_and_return() {
    assert_eq!(run_script("function", "fun f(x){ return x*x; } print f(4);"), "16\n");
}

#[test]
fn while_loop() {
    assert_eq!(
        run_script("while_loop", "var i=0; while (i<3) { print i; i = i+1; }"),
        "0\n1\n2\n"
    );
}

#[test]
fn closures_sharing_an_upvalue_across_calls() {
    assert_eq!(
        run_script(
            "closures",
            "fun make(){ var n=0; fun g(){ n = n+1; return n; } return g; } \
             var c = make(); print c(); print c(); print c();",
        ),
        "1\n2\n3\n"
    );
}

#[test]
fn string_concatenation() {
    assert_eq!(run_script("concat", r#"print "foo"+"bar";"#), "foobar\n");
}
