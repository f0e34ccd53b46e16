fn main() {
    clipglot::run();
}
