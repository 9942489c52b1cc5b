fn main() {
    let mut build = cc::Build::new();

    for file in ["error", "map"].iter() {
        println!("cargo:rerun-if-changed=c/{}.c", file);
        println!("cargo:rerun-if-changed=c/{}.h", file);

        build.file(format!("c/{}.c", file));
    }

    build
        .opt_level(2)
        .flag("-W")
        .flag("-Wall")
        .compile("chunkmap_support")
}
