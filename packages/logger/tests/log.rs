use logger;

macro_rules! expand_levels {
    ($($level:ident),+$(,)?) => {
        $(
            #[test]
            fn $level() {
                let key = "out.0200.000000000000000100001";
                logger::$level!("Hello, world!");
                logger::$level!("Hello, {}!", "world");
                logger::$level!("Pending {key} expired after {ms}ms.", ms = 250);
            }
        )*
    };
}

expand_levels!(trace, debug, info, warn, error,);
