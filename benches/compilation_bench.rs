//! Compilation performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tmplx::*;

const COUNTER_PAGE: &str = r#"<script type="text/tmplx">
var counter int
var doubled int = counter * 2
func add(n int) {
	counter += n
}
</script>
<h1>Counter</h1>
<button tx-onclick="add(1)">+</button>
<button tx-onclick="counter = 0">reset</button>
<p>{counter} / {doubled}</p>
"#;

const TODO_COMPONENT: &str = r#"<script type="text/tmplx">
// tx:prop
var title string
var list []string
var item string
func add() {
	list = append(list, item)
	item = ""
}
</script>
<template>
  <section>
    <h2>{title}</h2>
    <input type="text" tx-value="item">
    <button tx-onclick="add()">add</button>
    <ul>
      <li tx-for="i, l := range list" tx-key="l">{i}: {l}</li>
    </ul>
    <slot name="footer">no footer</slot>
  </section>
</template>
"#;

fn write_project(root: &Path, pages: usize) {
    let pages_dir = root.join("pages");
    let components_dir = root.join("components");
    fs::create_dir_all(&pages_dir).unwrap();
    fs::create_dir_all(&components_dir).unwrap();
    fs::write(components_dir.join("todo.html"), TODO_COMPONENT).unwrap();

    fs::write(pages_dir.join("index.html"), COUNTER_PAGE).unwrap();
    for i in 0..pages {
        let page = format!(
            "<h1>Page {i}</h1>\n<tx-todo title=\"List {i}\"><p slot=\"footer\">{i}</p></tx-todo>\n<tx-todo title=\"Other {i}\"></tx-todo>\n"
        );
        fs::write(pages_dir.join(format!("page{}.html", i)), page).unwrap();
    }
}

fn options(root: &Path) -> CompilerOptions {
    CompilerOptions {
        pages_dir: root.join("pages"),
        components_dir: root.join("components"),
        out_file: Some(root.join("out").join("tmplx.go")),
        ..CompilerOptions::default()
    }
}

fn bench_small_project(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    write_project(temp_dir.path(), 1);
    let options = options(temp_dir.path());

    c.bench_function("small_project", |b| {
        b.iter(|| compile_project(black_box(&options)).unwrap())
    });
}

fn bench_project_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("project_scaling");
    for pages in [10, 50, 200] {
        let temp_dir = TempDir::new().unwrap();
        write_project(temp_dir.path(), pages);
        let options = options(temp_dir.path());

        group.bench_with_input(BenchmarkId::from_parameter(pages), &options, |b, options| {
            b.iter(|| check_project(black_box(options)).unwrap())
        });
    }
    group.finish();
}

fn bench_html_parsing(c: &mut Criterion) {
    let mut source = String::from("<ul>\n");
    for i in 0..1000 {
        source.push_str(&format!("  <li class=\"item-{i}\" tx-onclick=\"select({i})\">Item {{items[{i}]}}</li>\n"));
    }
    source.push_str("</ul>\n");

    c.bench_function("html_parse_1000_items", |b| {
        b.iter(|| html::parse(black_box(&source), "bench.html"))
    });
}

criterion_group!(benches, bench_small_project, bench_project_scaling, bench_html_parsing);
criterion_main!(benches);
