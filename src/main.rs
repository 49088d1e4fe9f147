fn main() {
    shotmark_lib::run()
}
